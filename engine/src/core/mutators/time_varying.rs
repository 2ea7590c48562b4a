//! Environmental links that make normally constant parameters vary by year.
//!
//! Linking is a three-step protocol because the solver, not this module, numbers the
//! parameters it reads:
//!
//! 1. [`TimeVarying::initial_rewrite`] adds one environmental channel per target to the
//!    data file, patches each target's link field and inserts unit-link parameter lines
//!    into the control file.
//! 2. The caller runs the solver once with estimation disabled and the starter pointed
//!    at the control file, which produces a fresh parameter file and report.
//! 3. [`final_rewrite`] reads the link parameters' numbers from that report and builds
//!    the final parameter file: `1` at link slots, the original values everywhere else.
//!
//! `io::tv` sequences the three steps against a model directory.

use std::collections::BTreeMap;

use serde::Deserialize;
use tracing::debug;

use crate::core::document::{Document, Marker};
use crate::core::error::{SimError, SimResult};
use crate::core::fields::{ValueLine, field, find_parameter, format_number, set_field};
use crate::core::par::ParFile;
use crate::core::report::{PARAMETERS, parameter_table};

pub const SR_SECTION: Marker<'static> = Marker::exact("#_Spawner-Recruitment");
pub const Q_SETUP: Marker<'static> = Marker::exact("#_Q_setup");
pub const SELEX_SECTION: Marker<'static> = Marker::exact("#_size_selex_types");
pub const MG_ENV_SETUP: Marker<'static> = Marker::exact("#custom_MG-env_setup");
pub const SEL_ENV_SETUP: Marker<'static> = Marker::exact("#_custom_sel-env_setup");
pub const Q_PARMS: Marker<'static> = Marker::exact("#_Q_parms(if_any)");
pub const SR_ENV_LINK: Marker<'static> = Marker::exact("#_SR_env_link");
pub const SR_ENV_TARGET: Marker<'static> = Marker::exact("#_SR_env_target");

pub const STYR: Marker<'static> = Marker::exact("#_styr");
pub const ENDYR: Marker<'static> = Marker::exact("#_endyr");
pub const N_AREAS: Marker<'static> = Marker::exact("#_N_areas");
pub const N_ENV_VARS: Marker<'static> = Marker::any_case("#_N_environ_variables");
pub const N_ENV_OBS: Marker<'static> = Marker::any_case("#_N_environ_obs");

/// Label the solver gives the existing stock-recruitment link parameter.
pub const SR_LINK_LABEL: &str = "SR_envlink";

/// Field positions on a 14-column biology or selectivity parameter line.
const ENV_FIELD: usize = 7;
const DEV_FIELD: usize = 8;
const BLOCK_FIELD: usize = 12;
/// Field positions on a 7-column short parameter line.
const INIT_FIELD: usize = 2;
const PHASE_FIELD: usize = 6;
/// Env-var column of a catchability setup row.
const Q_ENV_FIELD: usize = 1;

/// Request: one deviation per model year for each named parameter or fleet.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeVarying {
    pub deviations: BTreeMap<String, Vec<f64>>,
}

/// Where a time-varying target lives in the control file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    NaturalMortalityGrowth,
    StockRecruitment,
    /// Catchability of the 1-based `fleet`.
    Catchability { fleet: usize },
    Selectivity,
}

/// A classified request with its environmental channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub name: String,
    pub category: Category,
    pub channel: usize,
    /// Line of the parameter, or of the catchability setup row.
    line: usize,
    deviations: Vec<f64>,
}

/// A link parameter the final rewrite must set to one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSlot {
    /// Report label of the link parameter.
    pub label: String,
    pub category: Category,
    /// Whether the initial rewrite added the line (as opposed to reusing an existing one).
    pub inserted: bool,
}

/// Output of the initial rewrite.
#[derive(Debug, Clone)]
pub struct InitialRewrite {
    pub ctl: Document,
    pub dat: Document,
    pub links: Vec<LinkSlot>,
}

/// Model years declared by the data file.
pub fn model_years(dat: &Document) -> SimResult<(i32, i32)> {
    let styr: i32 = field(dat, dat.locate(STYR)?, 0, STYR.text())?;
    let endyr: i32 = field(dat, dat.locate(ENDYR)?, 0, ENDYR.text())?;
    if endyr < styr {
        return Err(SimError::format(
            dat.name(),
            ENDYR.text(),
            format!("end year {endyr} precedes start year {styr}"),
        ));
    }
    Ok((styr, endyr))
}

/// Fleet and survey names, in fleet-number order.
pub fn fleet_names(dat: &Document) -> SimResult<Vec<String>> {
    let areas = dat.locate(N_AREAS)?;
    let names: Vec<String> = dat
        .line(areas + 1)
        .unwrap_or_default()
        .split('%')
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect();
    if names.is_empty() {
        return Err(SimError::format(
            dat.name(),
            N_AREAS.text(),
            "no fleet names on the following line",
        ));
    }
    Ok(names)
}

struct Sections {
    sr: usize,
    q: usize,
    selex: usize,
}

impl Sections {
    fn locate(ctl: &Document) -> SimResult<Self> {
        let sections = Self {
            sr: ctl.locate(SR_SECTION)?,
            q: ctl.locate(Q_SETUP)?,
            selex: ctl.locate(SELEX_SECTION)?,
        };
        if !(sections.sr < sections.q && sections.q < sections.selex) {
            return Err(SimError::format(
                ctl.name(),
                SR_SECTION.text(),
                "section markers are out of order",
            ));
        }
        Ok(sections)
    }
}

/// Classify `name` against the control file's section boundaries.
///
/// A name equal to a fleet name targets that fleet's catchability. Any other name
/// must label exactly one parameter line.
pub fn classify(ctl: &Document, fleets: &[String], name: &str) -> SimResult<Category> {
    if let Some(pos) = fleets.iter().position(|fleet| fleet == name) {
        return Ok(Category::Catchability { fleet: pos + 1 });
    }
    let line = find_parameter(ctl, name)?;
    let sections = Sections::locate(ctl)?;
    if line < sections.sr {
        Ok(Category::NaturalMortalityGrowth)
    } else if line < sections.q {
        if !name.starts_with("SR_") {
            return Err(SimError::contract(format!(
                "{name:?} lies between the stock-recruitment and catchability sections \
                 but is not a stock-recruitment parameter"
            )));
        }
        Ok(Category::StockRecruitment)
    } else if line < sections.selex {
        let owners: Vec<usize> = fleets
            .iter()
            .enumerate()
            .filter(|(_, fleet)| name.contains(fleet.as_str()))
            .map(|(index, _)| index + 1)
            .collect();
        match owners.as_slice() {
            [fleet] => Ok(Category::Catchability { fleet: *fleet }),
            [] => Err(SimError::contract(format!(
                "catchability parameter {name:?} names no fleet"
            ))),
            _ => Err(SimError::contract(format!(
                "catchability parameter {name:?} matches fleets {owners:?}"
            ))),
        }
    } else {
        Ok(Category::Selectivity)
    }
}

/// Line of the catchability setup row for `fleet`.
fn q_setup_row(ctl: &Document, fleet: usize) -> SimResult<usize> {
    let start = ctl.locate(Q_SETUP)?;
    let end = ctl.locate_from(start + 1, Q_PARMS)?;
    (start + 1..end)
        .filter(|&index| {
            ctl.line(index)
                .is_some_and(|line| !ValueLine::split(line).is_comment_only())
        })
        .nth(fleet - 1)
        .ok_or_else(|| {
            SimError::format(
                ctl.name(),
                Q_SETUP.text(),
                format!("no setup row for fleet {fleet}"),
            )
        })
}

fn is_set(ctl: &Document, line: usize, index: usize, marker: &str) -> SimResult<bool> {
    Ok(field::<f64>(ctl, line, index, marker)? != 0.0)
}

impl TimeVarying {
    /// Classify every request, reject conflicts with the base model, then validate the
    /// deviation vectors. Nothing is rewritten.
    pub fn targets(&self, ctl: &Document, dat: &Document) -> SimResult<Vec<Target>> {
        if self.deviations.is_empty() {
            return Err(SimError::contract("time-varying request names no parameters"));
        }
        let fleets = fleet_names(dat)?;

        let mut classified = Vec::with_capacity(self.deviations.len());
        for name in self.deviations.keys() {
            let category = classify(ctl, &fleets, name)?;
            let line = match category {
                Category::Catchability { fleet } => q_setup_row(ctl, fleet)?,
                _ => find_parameter(ctl, name)?,
            };
            classified.push((name, category, line));
        }

        let sr_targets = classified
            .iter()
            .filter(|(_, category, _)| *category == Category::StockRecruitment)
            .count();
        if sr_targets > 1 {
            return Err(SimError::Conflict(format!(
                "{sr_targets} stock-recruitment parameters requested; at most one may vary"
            )));
        }
        for (name, category, line) in &classified {
            check_not_linked(ctl, name, *category, *line)?;
        }

        let (styr, endyr) = model_years(dat)?;
        let years = usize::try_from(endyr - styr + 1).unwrap_or_default();
        let existing: usize = field(dat, dat.locate(N_ENV_VARS)?, 0, N_ENV_VARS.text())?;

        classified
            .into_iter()
            .enumerate()
            .map(|(k, (name, category, line))| {
                let deviations = &self.deviations[name];
                if deviations.len() != years {
                    return Err(SimError::contract(format!(
                        "{name}: {} deviations for {years} model years ({styr}-{endyr})",
                        deviations.len()
                    )));
                }
                if deviations.iter().any(|value| !value.is_finite()) {
                    return Err(SimError::contract(format!(
                        "{name}: deviations must be finite"
                    )));
                }
                Ok(Target {
                    name: name.clone(),
                    category,
                    channel: existing + 1 + k,
                    line,
                    deviations: deviations.clone(),
                })
            })
            .collect()
    }

    /// Step one: link every target to a new environmental channel.
    pub fn initial_rewrite(&self, ctl: &Document, dat: &Document) -> SimResult<InitialRewrite> {
        let targets = self.targets(ctl, dat)?;
        let fleets = fleet_names(dat)?;

        let mut out = ctl.clone();
        let mut links = Vec::with_capacity(targets.len());
        // (anchor line, parameter order key, link line)
        let mut inserts: Vec<(usize, usize, String)> = Vec::new();

        for target in &targets {
            let channel = target.channel.to_string();
            match target.category {
                Category::NaturalMortalityGrowth | Category::Selectivity => {
                    let additive = format!("-{channel}");
                    out = set_field(&out, target.line, ENV_FIELD, &additive, &target.name)?;
                    let anchor = if target.category == Category::Selectivity {
                        SEL_ENV_SETUP
                    } else {
                        MG_ENV_SETUP
                    };
                    let label = format!("{}_ENV_add", target.name);
                    inserts.push((out.locate(anchor)?, target.line, link_line(&label)));
                    links.push(LinkSlot {
                        label,
                        category: target.category,
                        inserted: true,
                    });
                }
                Category::Catchability { fleet } => {
                    out = set_field(&out, target.line, Q_ENV_FIELD, &channel, Q_SETUP.text())?;
                    let label = format!("Q_envlink_{fleet}_{}", fleets[fleet - 1]);
                    inserts.push((out.locate(Q_PARMS)?, fleet, link_line(&label)));
                    links.push(LinkSlot {
                        label,
                        category: target.category,
                        inserted: true,
                    });
                }
                Category::StockRecruitment => {
                    out = link_stock_recruitment(&out, target)?;
                    links.push(LinkSlot {
                        label: SR_LINK_LABEL.to_string(),
                        category: target.category,
                        inserted: false,
                    });
                }
            }
        }

        // Bottom-up so earlier anchors keep their line numbers.
        inserts.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        let mut grouped: Vec<(usize, Vec<String>)> = Vec::new();
        for (anchor, _, line) in inserts {
            match grouped.last_mut() {
                Some((last, lines)) if *last == anchor => lines.push(line),
                _ => grouped.push((anchor, vec![line])),
            }
        }
        for (anchor, lines) in grouped {
            out = out.append_after(anchor, lines)?;
        }

        let dat = add_environment_rows(dat, &targets)?;
        debug!(targets = targets.len(), "time-varying initial rewrite");
        Ok(InitialRewrite {
            ctl: out,
            dat,
            links,
        })
    }
}

fn link_line(label: &str) -> String {
    format!(" -10 10 1 0 -1 99 -5 # {label}")
}

fn check_not_linked(ctl: &Document, name: &str, category: Category, line: usize) -> SimResult<()> {
    let already = match category {
        Category::NaturalMortalityGrowth | Category::Selectivity => {
            is_set(ctl, line, ENV_FIELD, name)?
                || is_set(ctl, line, DEV_FIELD, name)?
                || is_set(ctl, line, BLOCK_FIELD, name)?
        }
        Category::Catchability { .. } => is_set(ctl, line, Q_ENV_FIELD, Q_SETUP.text())?,
        Category::StockRecruitment => {
            is_set(ctl, ctl.locate(SR_ENV_LINK)?, 0, SR_ENV_LINK.text())?
        }
    };
    if already {
        return Err(SimError::Conflict(format!(
            "{name} is already time-varying in the base model"
        )));
    }
    Ok(())
}

/// `#_SR_env_target` code for a stock-recruitment parameter label: virgin
/// recruitment, steepness, or recruitment deviations for any other parameter.
fn sr_env_target(label: &str) -> u8 {
    match label {
        "SR_LN(R0)" => 2,
        "SR_BH_steep" | "SR_BH_flat_steep" | "SR_Ricker_beta" | "SR_SCAA_null" => 3,
        _ => 1,
    }
}

fn link_stock_recruitment(ctl: &Document, target: &Target) -> SimResult<Document> {
    let link_target = sr_env_target(&target.name);
    let env_link = ctl.locate(SR_ENV_LINK)?;
    let out = set_field(
        ctl,
        env_link,
        0,
        &target.channel.to_string(),
        SR_ENV_LINK.text(),
    )?;
    let env_target = out.locate(SR_ENV_TARGET)?;
    let out = set_field(
        &out,
        env_target,
        0,
        &link_target.to_string(),
        SR_ENV_TARGET.text(),
    )?;

    let link_param = find_parameter(&out, SR_LINK_LABEL)?;
    let phase: i32 = field(&out, link_param, PHASE_FIELD, SR_LINK_LABEL)?;
    let out = set_field(&out, link_param, INIT_FIELD, "1", SR_LINK_LABEL)?;
    set_field(
        &out,
        link_param,
        PHASE_FIELD,
        &(-phase.abs().max(1)).to_string(),
        SR_LINK_LABEL,
    )
}

fn add_environment_rows(dat: &Document, targets: &[Target]) -> SimResult<Document> {
    let (styr, _) = model_years(dat)?;
    let vars_line = dat.locate(N_ENV_VARS)?;
    let obs_line = dat.locate(N_ENV_OBS)?;
    let vars: usize = field(dat, vars_line, 0, N_ENV_VARS.text())?;
    let obs: usize = field(dat, obs_line, 0, N_ENV_OBS.text())?;

    let existing_rows = dat.lines()[obs_line + 1..]
        .iter()
        .take_while(|line| ValueLine::split(line).values.len() >= 3)
        .count();
    if existing_rows < obs {
        return Err(SimError::format(
            dat.name(),
            N_ENV_OBS.text(),
            format!("declares {obs} observations but {existing_rows} rows follow"),
        ));
    }

    let mut rows = Vec::new();
    for target in targets {
        for (offset, value) in target.deviations.iter().enumerate() {
            let year = styr + offset as i32;
            rows.push(format!(" {year} {} {}", target.channel, format_number(*value)));
        }
    }
    let added = rows.len();

    let out = set_field(
        dat,
        vars_line,
        0,
        &(vars + targets.len()).to_string(),
        N_ENV_VARS.text(),
    )?;
    let out = set_field(
        &out,
        obs_line,
        0,
        &(obs + added).to_string(),
        N_ENV_OBS.text(),
    )?;
    out.insert_at(obs_line + 1 + obs, rows)
}

/// Step three: build the final parameter file.
///
/// `solved_par` and `report` come from the no-estimation solve of the rewritten
/// model; `original_par` is the base model's parameter file from before step one.
pub fn final_rewrite(
    original_par: &Document,
    solved_par: &Document,
    report: &Document,
    links: &[LinkSlot],
) -> SimResult<Document> {
    let table = parameter_table(report)?;
    let mut link_slots: BTreeMap<usize, bool> = BTreeMap::new();
    for link in links {
        let nums: Vec<usize> = table
            .iter()
            .filter(|row| row.label == link.label)
            .map(|row| row.num)
            .collect();
        match nums.as_slice() {
            [num] => {
                link_slots.insert(*num, link.inserted);
            }
            [] => {
                return Err(SimError::format(
                    report.name(),
                    PARAMETERS,
                    format!("link parameter {} missing from report", link.label),
                ));
            }
            _ => {
                return Err(SimError::format(
                    report.name(),
                    PARAMETERS,
                    format!("link parameter {} reported {} times", link.label, nums.len()),
                ));
            }
        }
    }

    let solved = ParFile::parse(solved_par)?;
    let original = ParFile::parse(original_par)?;
    let slot_count = solved.slot_count();
    if let Some((&num, _)) = link_slots.range(slot_count + 1..).next() {
        return Err(SimError::format(
            solved_par.name(),
            PARAMETERS,
            format!("link parameter number {num} beyond {slot_count} slots"),
        ));
    }

    let mut originals = original.slots().into_iter();
    let mut values = Vec::with_capacity(slot_count);
    for num in 1..=slot_count {
        let inserted = link_slots.get(&num).copied();
        if inserted != Some(true) {
            let value = originals.next().ok_or_else(|| {
                SimError::format(
                    original_par.name(),
                    "# name:",
                    format!("original parameters run out at slot {num}"),
                )
            })?;
            if inserted.is_none() {
                values.push(value.to_string());
                continue;
            }
        }
        values.push("1".to_string());
    }
    let leftover = originals.count();
    if leftover > 0 {
        return Err(SimError::format(
            original_par.name(),
            "# name:",
            format!("{leftover} original parameters have no slot in the solved layout"),
        ));
    }

    Ok(solved.with_slots(values)?.to_document(solved_par.name()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fields::find_labelled;
    use crate::test_support::{CONTROL, DATA, PAR};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn ctl() -> Document {
        Document::parse("om.ctl", CONTROL)
    }

    fn dat() -> Document {
        Document::parse("om.dat", DATA)
    }

    fn fleets() -> Vec<String> {
        fleet_names(&dat()).expect("fleets")
    }

    fn request(names: &[&str]) -> TimeVarying {
        let (styr, endyr) = model_years(&dat()).expect("years");
        let years = (endyr - styr + 1) as usize;
        TimeVarying {
            deviations: names
                .iter()
                .map(|name| (name.to_string(), vec![0.1; years]))
                .collect(),
        }
    }

    #[test]
    fn classifies_by_section() {
        let (ctl, fleets) = (ctl(), fleets());
        assert_eq!(
            classify(&ctl, &fleets, "NatM_p_1_Fem_GP_1").expect("mg"),
            Category::NaturalMortalityGrowth
        );
        assert_eq!(
            classify(&ctl, &fleets, "SR_LN(R0)").expect("sr"),
            Category::StockRecruitment
        );
        assert_eq!(
            classify(&ctl, &fleets, "Survey").expect("fleet"),
            Category::Catchability { fleet: 2 }
        );
        assert_eq!(
            classify(&ctl, &fleets, "LnQ_base_2_Survey").expect("q parm"),
            Category::Catchability { fleet: 2 }
        );
        assert_eq!(
            classify(&ctl, &fleets, "SizeSel_1P_1_Fishery").expect("sel"),
            Category::Selectivity
        );
    }

    #[test]
    fn unknown_or_misplaced_names_are_rejected() {
        let (ctl, fleets) = (ctl(), fleets());
        for name in ["Nope", "InitF_1Fishery"] {
            let err = classify(&ctl, &fleets, name).expect_err(name);
            assert!(matches!(err, SimError::ContractViolation(_)), "{name}: {err}");
        }
    }

    #[test]
    fn second_stock_recruitment_target_conflicts() {
        let err = request(&["SR_LN(R0)", "SR_BH_steep"])
            .initial_rewrite(&ctl(), &dat())
            .expect_err("two SR targets");
        assert!(matches!(err, SimError::Conflict(_)));
    }

    #[test]
    fn stock_recruitment_target_follows_the_parameter_label() {
        assert_eq!(sr_env_target("SR_LN(R0)"), 2);
        assert_eq!(sr_env_target("SR_BH_steep"), 3);
        assert_eq!(sr_env_target("SR_R0_offset"), 1);
        assert_eq!(sr_env_target("SR_steepness_prior"), 1);

        let (ctl, dat) = (ctl(), dat());
        for (name, code) in [("SR_BH_steep", 3), ("SR_sigmaR", 1), ("SR_R1_offset", 1)] {
            let out = request(&[name]).initial_rewrite(&ctl, &dat).expect(name);
            let sr_target = out.ctl.locate(SR_ENV_TARGET).expect("sr target");
            assert_eq!(
                field::<i32>(&out.ctl, sr_target, 0, "").expect("target"),
                code,
                "{name}"
            );
        }
    }

    #[test]
    fn deviation_length_must_match_model_years() {
        let mut tv = request(&["NatM_p_1_Fem_GP_1"]);
        tv.deviations.insert("NatM_p_1_Fem_GP_1".into(), vec![0.1; 3]);
        let err = tv.initial_rewrite(&ctl(), &dat()).expect_err("short");
        assert!(matches!(err, SimError::ContractViolation(_)));
    }

    #[test]
    fn initial_rewrite_links_each_category() {
        let (ctl, dat) = (ctl(), dat());
        let tv = request(&["NatM_p_1_Fem_GP_1", "SR_LN(R0)", "Survey"]);
        let out = tv.initial_rewrite(&ctl, &dat).expect("rewrite");

        // BTreeMap order: NatM (channel 1), SR_LN(R0) (2), Survey (3).
        let natm = find_parameter(&out.ctl, "NatM_p_1_Fem_GP_1").expect("natm");
        assert_eq!(field::<i32>(&out.ctl, natm, ENV_FIELD, "").expect("env"), -1);

        let sr_link = out.ctl.locate(SR_ENV_LINK).expect("sr link");
        assert_eq!(field::<i32>(&out.ctl, sr_link, 0, "").expect("link"), 2);
        let sr_target = out.ctl.locate(SR_ENV_TARGET).expect("sr target");
        assert_eq!(field::<i32>(&out.ctl, sr_target, 0, "").expect("target"), 2);
        let sr_parm = find_parameter(&out.ctl, SR_LINK_LABEL).expect("SR_envlink");
        assert_eq!(field::<f64>(&out.ctl, sr_parm, INIT_FIELD, "").expect("init"), 1.0);
        assert!(field::<i32>(&out.ctl, sr_parm, PHASE_FIELD, "").expect("phase") < 0);

        let q_row = q_setup_row(&out.ctl, 2).expect("q row");
        assert_eq!(field::<i32>(&out.ctl, q_row, Q_ENV_FIELD, "").expect("q env"), 3);

        let mg_anchor = out.ctl.locate(MG_ENV_SETUP).expect("anchor");
        assert_eq!(
            out.ctl.line(mg_anchor + 1),
            Some(" -10 10 1 0 -1 99 -5 # NatM_p_1_Fem_GP_1_ENV_add")
        );
        let q_anchor = out.ctl.locate(Q_PARMS).expect("q anchor");
        assert_eq!(
            out.ctl.line(q_anchor + 1),
            Some(" -10 10 1 0 -1 99 -5 # Q_envlink_2_Survey")
        );
        assert_eq!(out.ctl.len(), ctl.len() + 2);

        let labels: Vec<&str> = out.links.iter().map(|link| link.label.as_str()).collect();
        assert_eq!(
            labels,
            vec!["NatM_p_1_Fem_GP_1_ENV_add", "SR_envlink", "Q_envlink_2_Survey"]
        );
        assert!(!out.links[1].inserted);
    }

    #[test]
    fn initial_rewrite_appends_environment_rows() {
        let dat = dat();
        let (styr, endyr) = model_years(&dat).expect("years");
        let years = (endyr - styr + 1) as usize;
        let out = request(&["NatM_p_1_Fem_GP_1", "SizeSel_1P_1_Fishery"])
            .initial_rewrite(&ctl(), &dat)
            .expect("rewrite");

        let vars = out.dat.locate(N_ENV_VARS).expect("vars");
        assert_eq!(field::<usize>(&out.dat, vars, 0, "").expect("vars"), 2);
        let obs = out.dat.locate(N_ENV_OBS).expect("obs");
        assert_eq!(field::<usize>(&out.dat, obs, 0, "").expect("obs"), 2 * years);
        assert_eq!(out.dat.line(obs + 1), Some(format!(" {styr} 1 0.1").as_str()));
        assert_eq!(
            out.dat.line(obs + 2 * years),
            Some(format!(" {endyr} 2 0.1").as_str())
        );
        assert_eq!(out.dat.len(), dat.len() + 2 * years);
    }

    #[test]
    fn final_rewrite_restores_original_values_around_links() {
        let (ctl, dat) = (ctl(), dat());
        let out = request(&["NatM_p_1_Fem_GP_1", "SR_LN(R0)"])
            .initial_rewrite(&ctl, &dat)
            .expect("rewrite");

        // Solver view of the rewritten control file: one slot per parameter line.
        let params: Vec<String> = out
            .ctl
            .lines()
            .iter()
            .filter_map(|line| {
                let parsed = ValueLine::split(line);
                (parsed.values.len() >= 7).then(|| parsed.label()).flatten()
            })
            .map(str::to_string)
            .collect();
        let mut solved = vec!["# Number of parameters".to_string()];
        let mut report = vec!["PARAMETERS".to_string(), "Num Label Value".to_string()];
        for (index, label) in params.iter().enumerate() {
            solved.push(format!("# parm[{}]:", index + 1));
            solved.push("0.5".to_string());
            report.push(format!("{} {label} 0.5", index + 1));
        }
        let solved = Document::from_lines("ss3.par", solved);
        let report = Document::from_lines("Report.sso", report);
        let original = Document::parse("ss3.par", PAR);

        let result = final_rewrite(&original, &solved, &report, &out.links).expect("final");
        let slots: Vec<String> = ParFile::parse(&result)
            .expect("par")
            .slots()
            .into_iter()
            .map(str::to_string)
            .collect();

        let original_slots = ParFile::parse(&original).expect("par").slots().len();
        assert_eq!(slots.len(), original_slots + 1);
        let natm_link = params
            .iter()
            .position(|label| label == "NatM_p_1_Fem_GP_1_ENV_add")
            .expect("link");
        let sr_link = params
            .iter()
            .position(|label| label == SR_LINK_LABEL)
            .expect("sr link");
        assert_eq!(slots[natm_link], "1");
        assert_eq!(slots[sr_link], "1");

        let mut expected = ParFile::parse(&original)
            .expect("par")
            .slots()
            .into_iter()
            .map(str::to_string)
            .collect::<Vec<_>>();
        expected.insert(natm_link, "1".to_string());
        expected[sr_link] = "1".to_string();
        assert_eq!(slots, expected);
    }

    #[test]
    fn final_rewrite_requires_link_in_report() {
        let links = vec![LinkSlot {
            label: "Missing_ENV_add".into(),
            category: Category::NaturalMortalityGrowth,
            inserted: true,
        }];
        let report = Document::parse("Report.sso", "PARAMETERS\nNum Label Value\n1 A 0.1\n");
        let par = Document::parse("ss3.par", PAR);
        let err = final_rewrite(&par, &par, &report, &links).expect_err("missing");
        assert!(matches!(err, SimError::FormatMismatch { .. }));
    }

    #[test]
    fn base_fixture_marks_growth_k_as_varying() {
        let ctl = ctl();
        let line = find_labelled(&ctl, "VonBert_K_Fem_GP_1");
        assert_eq!(line.len(), 1);
        assert!(is_set(&ctl, line[0], DEV_FIELD, "").expect("field"));
    }

    proptest! {
        #[test]
        fn already_varying_parameter_always_conflicts(
            deviations in proptest::collection::vec(any::<f64>(), 0..30),
        ) {
            let tv = TimeVarying {
                deviations: BTreeMap::from([("VonBert_K_Fem_GP_1".to_string(), deviations)]),
            };
            let result = tv.initial_rewrite(&ctl(), &dat());
            prop_assert!(matches!(result, Err(SimError::Conflict(_))));
        }
    }
}
