//! Scenarios: one fixed combination of experimental factors.
//!
//! Each factor carries a case identifier (`F1`, `D0`, ...) and the parameters of
//! one mutator. A scenario's id is its case identifiers in sorted order joined with
//! `-`, followed by the optional label, e.g. `D0-F1-cod`.

use anyhow::{Context, Result, bail};
use engine::core::document::Document;
use engine::core::mutators::estimation::Estimation;
use engine::core::mutators::fishing::FishingMortality;
use engine::core::mutators::index::IndexDesign;
use engine::core::mutators::retro::Retrospective;
use engine::core::mutators::starter::model_file_names;
use engine::core::mutators::time_varying::{TimeVarying, fleet_names};
use engine::core::types::ModelKind;
use engine::io::files::read_document;
use engine::io::layout::{BaseModel, BaseModels};
use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer};

use crate::config::validate_slug;

/// A mutator's parameters tagged with the factor's case identifier.
///
/// In TOML the `case` key sits next to the parameters:
///
/// ```toml
/// [scenarios.fishing]
/// case = "F1"
/// years = [1971, 1972]
/// fisheries = [1]
/// fvals = [0.2]
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Factor<T> {
    pub case: String,
    pub params: T,
}

impl<'de, T: DeserializeOwned> Deserialize<'de> for Factor<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut table = toml::Table::deserialize(deserializer)?;
        let case = match table.remove("case") {
            Some(toml::Value::String(case)) => case,
            Some(other) => {
                return Err(D::Error::custom(format!(
                    "case must be a string, got {}",
                    other.type_str()
                )));
            }
            None => return Err(D::Error::missing_field("case")),
        };
        let params = toml::Value::Table(table)
            .try_into()
            .map_err(D::Error::custom)?;
        Ok(Self { case, params })
    }
}

/// A scenario as written in the batch file.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ScenarioSpec {
    /// Appended to the id, typically the species or model name.
    pub label: Option<String>,
    pub fishing: Option<Factor<FishingMortality>>,
    pub time_varying: Option<Factor<TimeVarying>>,
    pub index: Option<Factor<IndexDesign>>,
    pub retro: Option<Factor<Retrospective>>,
    pub estimation: Option<Factor<Estimation>>,
}

/// A validated scenario with its id.
#[derive(Debug, Clone, PartialEq)]
pub struct Scenario {
    pub id: String,
    pub fishing: Option<FishingMortality>,
    pub time_varying: Option<TimeVarying>,
    pub index: Option<IndexDesign>,
    pub retro: Option<Retrospective>,
    pub estimation: Option<Estimation>,
}

impl Scenario {
    pub fn from_spec(spec: &ScenarioSpec) -> Result<Self> {
        let mut cases: Vec<&str> = [
            spec.fishing.as_ref().map(|f| f.case.as_str()),
            spec.time_varying.as_ref().map(|f| f.case.as_str()),
            spec.index.as_ref().map(|f| f.case.as_str()),
            spec.retro.as_ref().map(|f| f.case.as_str()),
            spec.estimation.as_ref().map(|f| f.case.as_str()),
        ]
        .into_iter()
        .flatten()
        .collect();
        for case in &cases {
            validate_slug("case", case)?;
        }
        cases.sort_unstable();
        if let Some(pair) = cases.windows(2).find(|pair| pair[0] == pair[1]) {
            bail!("case {} is used by two factors", pair[0]);
        }
        let mut parts: Vec<&str> = cases;
        if let Some(label) = &spec.label {
            validate_slug("label", label)?;
            parts.push(label);
        }
        if parts.is_empty() {
            bail!("scenario needs at least one factor or a label");
        }

        let scenario = Self {
            id: parts.join("-"),
            fishing: spec.fishing.as_ref().map(|f| f.params.clone()),
            time_varying: spec.time_varying.as_ref().map(|f| f.params.clone()),
            index: spec.index.as_ref().map(|f| f.params.clone()),
            retro: spec.retro.as_ref().map(|f| f.params.clone()),
            estimation: spec.estimation.as_ref().map(|f| f.params.clone()),
        };
        scenario.validate()?;
        Ok(scenario)
    }

    /// Document-independent checks on every factor.
    fn validate(&self) -> Result<()> {
        if let Some(fishing) = &self.fishing {
            fishing.rows().context("fishing")?;
        }
        if let Some(tv) = &self.time_varying
            && tv.deviations.is_empty()
        {
            bail!("time_varying.deviations names no parameters");
        }
        if let Some(index) = &self.index {
            index.validate().context("index")?;
        }
        if let Some(retro) = &self.retro {
            retro.validate().context("retro")?;
        }
        if let Some(estimation) = &self.estimation {
            estimation.validate().context("estimation")?;
        }
        Ok(())
    }

    /// Which models the scenario mutates.
    pub fn touches(&self, kind: ModelKind) -> bool {
        match kind {
            ModelKind::Om => self.fishing.is_some() || self.time_varying.is_some(),
            ModelKind::Em => {
                self.index.is_some() || self.retro.is_some() || self.estimation.is_some()
            }
        }
    }

    /// Apply every pure mutation to in-memory copies of the base models.
    ///
    /// Catches missing markers, unknown parameter names and time-varying conflicts at
    /// load time instead of inside the first iteration.
    pub fn preflight(&self, base: &BaseModels) -> Result<()> {
        let om_ctl = read_document(&base.om.path(&base.om.files.ctl))?;
        let om_dat = read_document(&base.om.path(&base.om.files.dat))?;
        let om_ctl = match &self.fishing {
            Some(fishing) => fishing.apply(&om_ctl).context("fishing")?,
            None => om_ctl,
        };
        if let Some(tv) = &self.time_varying {
            tv.initial_rewrite(&om_ctl, &om_dat).context("time_varying")?;
        }
        if let Some(index) = &self.index {
            check_index_fleets(index, &om_dat)?;
        }
        if let Some(retro) = &self.retro {
            let starter = read_document(&base.em.path(&base.em.files.starter))?;
            retro.apply(&starter).context("retro")?;
        }
        if let Some(estimation) = &self.estimation {
            let em_ctl = read_document(&base.em.path(&base.em.files.ctl))?;
            estimation.apply(&em_ctl).context("estimation")?;
        }
        check_starter_names(&base.om)?;
        check_starter_names(&base.em)
    }
}

fn check_index_fleets(index: &IndexDesign, dat: &Document) -> Result<()> {
    let fleets = fleet_names(dat)?;
    if let Some(fleet) = index
        .fleets
        .iter()
        .find(|fleet| **fleet as usize > fleets.len())
    {
        bail!(
            "index fleet {fleet} does not exist; the data file has {} fleets",
            fleets.len()
        );
    }
    Ok(())
}

/// The solver reads the data and control files the starter names; they must be the
/// files the batch mutates.
fn check_starter_names(model: &BaseModel) -> Result<()> {
    let starter = read_document(&model.path(&model.files.starter))?;
    let Some((dat, ctl)) = model_file_names(&starter) else {
        bail!("{} names no data and control files", starter.name());
    };
    if dat != model.files.dat || ctl != model.files.ctl {
        bail!(
            "{} in {} names {dat} and {ctl}, expected {} and {}",
            starter.name(),
            model.dir.display(),
            model.files.dat,
            model.files.ctl
        );
    }
    Ok(())
}
