//! Estimation-model parameter settings: initial values and phases.

use serde::Deserialize;

use crate::core::document::Document;
use crate::core::error::{SimError, SimResult};
use crate::core::fields::{ValueLine, find_parameter, format_number, set_field};
use crate::core::mutators::broadcast;

const INIT_FIELD: usize = 2;
const PHASE_FIELD: usize = 6;

/// Per-parameter overrides; an empty vector leaves that field alone.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Estimation {
    pub par_names: Vec<String>,
    #[serde(default)]
    pub par_int: Vec<f64>,
    #[serde(default)]
    pub par_phase: Vec<i32>,
}

impl Estimation {
    pub fn validate(&self) -> SimResult<()> {
        if self.par_names.is_empty() {
            return Err(SimError::contract("estimation settings name no parameters"));
        }
        if self.par_int.is_empty() && self.par_phase.is_empty() {
            return Err(SimError::contract(
                "estimation settings need par_int or par_phase",
            ));
        }
        let len = self.par_names.len();
        if !self.par_int.is_empty() {
            broadcast("par_int", &self.par_int, len)?;
        }
        if !self.par_phase.is_empty() {
            broadcast("par_phase", &self.par_phase, len)?;
        }
        Ok(())
    }

    pub fn apply(&self, ctl: &Document) -> SimResult<Document> {
        self.validate()?;
        let len = self.par_names.len();
        let inits = if self.par_int.is_empty() {
            None
        } else {
            Some(broadcast("par_int", &self.par_int, len)?)
        };
        let phases = if self.par_phase.is_empty() {
            None
        } else {
            Some(broadcast("par_phase", &self.par_phase, len)?)
        };

        let mut out = ctl.clone();
        for (i, name) in self.par_names.iter().enumerate() {
            let line = find_parameter(&out, name)?;
            let values = ValueLine::split(out.line(line).unwrap_or_default()).values.len();
            if values <= PHASE_FIELD {
                return Err(SimError::format(
                    out.name(),
                    name,
                    format!("parameter line has {values} fields; expected at least 7"),
                ));
            }
            if let Some(inits) = &inits {
                out = set_field(&out, line, INIT_FIELD, &format_number(inits[i]), name)?;
            }
            if let Some(phases) = &phases {
                out = set_field(&out, line, PHASE_FIELD, &phases[i].to_string(), name)?;
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fields::field;
    use crate::test_support::CONTROL;

    #[test]
    fn sets_init_and_phase() {
        let ctl = Document::parse("em.ctl", CONTROL);
        let settings = Estimation {
            par_names: vec!["NatM_p_1_Fem_GP_1".into(), "SR_BH_steep".into()],
            par_int: vec![0.15],
            par_phase: vec![-1, 3],
        };
        let out = settings.apply(&ctl).expect("apply");

        let natm = find_parameter(&out, "NatM_p_1_Fem_GP_1").expect("natm");
        assert_eq!(field::<f64>(&out, natm, INIT_FIELD, "").expect("init"), 0.15);
        assert_eq!(field::<i32>(&out, natm, PHASE_FIELD, "").expect("phase"), -1);
        let steep = find_parameter(&out, "SR_BH_steep").expect("steep");
        assert_eq!(field::<f64>(&out, steep, INIT_FIELD, "").expect("init"), 0.15);
        assert_eq!(field::<i32>(&out, steep, PHASE_FIELD, "").expect("phase"), 3);
    }

    #[test]
    fn empty_vectors_leave_fields_alone() {
        let ctl = Document::parse("em.ctl", CONTROL);
        let settings = Estimation {
            par_names: vec!["SR_sigmaR".into()],
            par_int: Vec::new(),
            par_phase: vec![5],
        };
        let out = settings.apply(&ctl).expect("apply");
        let line = find_parameter(&out, "SR_sigmaR").expect("line");
        let before = find_parameter(&ctl, "SR_sigmaR").expect("line");
        assert_eq!(
            field::<f64>(&out, line, INIT_FIELD, "").expect("init"),
            field::<f64>(&ctl, before, INIT_FIELD, "").expect("init")
        );
    }

    #[test]
    fn mismatched_lengths_fail() {
        let settings = Estimation {
            par_names: vec!["A".into(), "B".into(), "C".into()],
            par_int: vec![1.0, 2.0],
            par_phase: Vec::new(),
        };
        assert!(matches!(settings.validate(), Err(SimError::ContractViolation(_))));
    }
}
