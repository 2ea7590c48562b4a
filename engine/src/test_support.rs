//! Fixtures and a scripted solver for tests.
//!
//! The fixtures are a small but complete model: ten years (1971-1980), one fishery and
//! one survey (`Fishery%Survey`), 19 control parameters and a matching parameter file.
//! `VonBert_K_Fem_GP_1` already has annual deviations, so it cannot be made
//! time-varying again.

use std::fs;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};

use crate::core::document::Document;
use crate::core::fields::{ValueLine, format_number};
use crate::core::mutators::starter::{model_file_names, use_par};
use crate::core::mutators::time_varying::model_years;
use crate::core::par::ParFile;
use crate::core::types::ModelKind;
use crate::io::files::read_document;
use crate::io::layout::{BaseModel, BaseModels, ModelFiles};
use crate::io::solver::{
    PAR_FILE, REPORT_FILE, SOLVER_LOG, SolveOutcome, SolveRequest, SolveStatus, Solver,
};

pub const CONTROL: &str = "\
#V3.24U
#C simulation control file
1 #_N_Growth_Patterns
1 #_N_Morphs_Within_GrowthPattern
#_Cond 1 #_Morph_between/within_stdev_ratio (no read if N_morphs=1)
#
#_Cond 0 # N recruitment designs goes here if N_GP*nseas*area>1
#_Cond 0 # N_movement_definitions goes here if N_areas > 1
#
1 #_Nblock_Patterns
 1 #_blocks_per_pattern
 1975 1977
#
0.5 #_fracfemale
0 #_natM_type:_0=1Parm
1 # GrowthModel: 1=vonBert with L1&L2
1 #_Growth_Age_for_L1
25 #_Growth_Age_for_L2 (999 to use as Linf)
0 #_SD_add_to_LAA
0 #_CV_Growth_Pattern
1 #_maturity_option
1 #_First_Mature_Age
1 #_fecundity option
0 #_hermaphroditism option
1 #_parameter_offset_approach
1 #_env/block/dev_adjust_method
#
#_growth_parms
#_LO HI INIT PRIOR PR_type SD PHASE env-var use_dev dev_minyr dev_maxyr dev_stddev Block Block_Fxn
 0.05 0.15 0.1 0.1 -1 0.8 -3 0 0 0 0 0.5 0 0 # NatM_p_1_Fem_GP_1
 10 30 20 20 -1 10 -2 0 0 0 0 0.5 0 0 # L_at_Amin_Fem_GP_1
 100 150 132 132 -1 10 -4 0 0 0 0 0.5 0 0 # L_at_Amax_Fem_GP_1
 0.1 0.3 0.2 0.2 -1 0.8 -4 0 1 1971 1980 0.5 0 0 # VonBert_K_Fem_GP_1
 0.05 0.25 0.1 0.1 -1 0.8 -3 0 0 0 0 0.5 0 0 # CV_young_Fem_GP_1
 -3 3 1e-05 1e-05 -1 0.8 -3 0 0 0 0 0.5 0 0 # Wtlen_1_Fem
 -3 4 3 3 -1 0.8 -3 0 0 0 0 0.5 0 0 # Wtlen_2_Fem
#
#_Cond 0 #custom_MG-env_setup (0/1)
#_Cond -2 2 0 0 -1 99 -2 #_placeholder when no MG-environ parameters
#
#_Cond 0 #custom_MG-block_setup (0/1)
#_Cond -2 2 0 0 -1 99 -2 #_placeholder when no MG-block parameters
#
#_Cond -4 #_MGparm_Dev_Phase
#
#_Spawner-Recruitment
3 #_SR_function: 2=Ricker; 3=std_B-H
#_LO HI INIT PRIOR PR_type SD PHASE
 3 31 18.7 10.3 -1 10 1 # SR_LN(R0)
 0.2 1 0.65 0.7 -1 0.05 -4 # SR_BH_steep
 0 2 0.4 0.8 -1 0.8 -4 # SR_sigmaR
 -5 5 0 0 -1 1 -3 # SR_envlink
 -5 5 0 0 -1 1 -4 # SR_R1_offset
 0 0 0 0 -1 0 -99 # SR_autocorr
0 #_SR_env_link
0 #_SR_env_target_0=none;1=devs;_2=R0;_3=steepness
1 #do_recdev:  0=none; 1=devvector; 2=simple deviations
1971 # first year of main recr_devs; early devs can preceed this era
1980 # last year of main recr_devs; forecast devs start in following year
-3 #_recdev phase
#
#Fishing Mortality info
0.3 # F ballpark
-2001 # F ballpark year (neg value to disable)
2 # F_Method:  1=Pope; 2=instan. F; 3=hybrid (hybrid is recommended)
4 # max F or harvest rate, depends on F_Method
# no additional F input needed for Fmethod 1
# if Fmethod=2; read overall start F value; overall phase; N detailed inputs to read
# if Fmethod=3; read N iterations for tuning for Fmethod 3
 0 1 3 # overall start F value; overall phase; N detailed inputs to read
#Fleet Yr Seas F_value se phase (for detailed setup of F_Method=2)
 1 1971 1 0.1 0.005 1
 1 1972 1 0.15 0.005 1
 1 1973 1 0.2 0.005 1
#
#_initial_F_parms
#_LO HI INIT PRIOR PR_type SD PHASE
 0 1 0 0.01 0 99 -1 # InitF_1Fishery
#
#_Q_setup
 # Q_type options:  <0=mirror, 0=float_nobiasadj, 1=float_biasadj, 2=parm_nobiasadj
#_Den-dep  env-var  extra_se  Q_type
 0 0 0 0 # 1 Fishery
 0 0 0 2 # 2 Survey
#
#_Cond 0 #_If q has random component, then 0=read one parm for each fleet with random q
#_Q_parms(if_any);Qunits_are_ln(q)
# LO HI INIT PRIOR PR_type SD PHASE
 -7 5 0.5 0 -1 1 1 # LnQ_base_2_Survey
#
#_size_selex_types
#_Pattern Discard Male Special
 1 0 0 0 # 1 Fishery
 1 0 0 0 # 2 Survey
#
#_age_selex_types
#_Pattern ___ Male Special
 10 0 0 0 # 1 Fishery
 10 0 0 0 # 2 Survey
#_LO HI INIT PRIOR PR_type SD PHASE env-var use_dev dev_minyr dev_maxyr dev_stddev Block Block_Fxn
 19 80 50 50 -1 99 2 0 0 0 0 0.5 0 0 # SizeSel_1P_1_Fishery
 0.01 60 15 15 -1 99 3 0 0 0 0 0.5 0 0 # SizeSel_1P_2_Fishery
 19 80 40 40 -1 99 2 0 0 0 0 0.5 0 0 # SizeSel_2P_1_Survey
 0.01 60 10 10 -1 99 3 0 0 0 0 0.5 0 0 # SizeSel_2P_2_Survey
#_Cond 0 #_custom_sel-env_setup (0/1)
#_Cond -2 2 0 0 -1 99 -2 #_placeholder when no enviro fxns
#_Cond 0 #_custom_sel-blk_setup (0/1)
#
#_Cond -4 #_selparmdev-phase
#
0 # Tune data (0/1)
#
999
";

pub const DATA: &str = "\
#V3.24U
#C simulated data file
1971 #_styr
1980 #_endyr
1 #_nseas
 12 #_months/season
1 #_spawn_seas
1 #_Nfleet
1 #_Nsurveys
1 #_N_areas
Fishery%Survey
0.5 0.5 #_surveytiming_in_season
1 1 #_area_assignments_for_each_fishery_and_survey
1 #_units of catch:  1=bio; 2=num
0.01 #_se of log(catch) only used for init_eq_catch and for Fmethod 2 and 3
1 #_Ngenders
40 #_Nages
0 #_init_equil_catch_for_each_fishery
10 #_N_lines_of_catch_to_read
#_catch_biomass(mtons):_columns_are_fisheries,year,season
 100 1971 1
 120 1972 1
 140 1973 1
 160 1974 1
 180 1975 1
 200 1976 1
 180 1977 1
 160 1978 1
 140 1979 1
 120 1980 1
#
 3 #_N_cpue_and_surveyabundance_observations
#_Units:  0=numbers; 1=biomass; 2=F
#_Errtype:  -1=normal; 0=lognormal; >0=T
#_Fleet Units Errtype
1 1 0 # Fishery
2 1 0 # Survey
#_year seas index obs se_log
 1972 1 2 950 0.2
 1975 1 2 800 0.2
 1978 1 2 700 0.2
#
0 #_N_fleets_with_discard
#_discard_units (1=same_as_catchunits(bio/num); 2=fraction; 3=numbers)
#
0 #_N_discard_obs
0 #_N_meanbodywt_obs
30 #_DF_for_meanbodywt_T-distribution_like
#
0 #_N_environ_variables
0 #_N_environ_obs
0 # N sizefreq methods to read
#
0 # no tag data
#
0 # no morphcomp data
#
999
";

pub const STARTER_OM: &str = "\
#V3.24U
om.dat
om.ctl
1 # 0=use init values in control file; 1=use ss3.par
0 # run display detail (0,1,2)
1 # detailed age-structured reports in REPORT.SSO (0,1)
0 # write detailed checkup.sso file (0,1)
0 # write parm values to ParmTrace.sso (0=no,1=good,active; 2=good,all; 3=every_iter,all_parms; 4=every,active)
1 # write to cumreport.sso (0=no,1=like&timeseries; 2=add survey fits)
1 # Include prior_like for non-estimated parameters (0,1)
1 # Use Soft Boundaries to aid convergence (0,1) (recommended)
1 # Number of datafiles to produce: 1st is input, 2nd is estimates, 3rd and higher are bootstrap
10 # Turn off estimation for parameters entering after this phase
0 # MCeval burn interval
1 # MCeval thin interval
0 # jitter initial parm value by this fraction
-1 # min yr for sdreport outputs (-1 for styr)
-2 # max yr for sdreport outputs (-1 for endyr; -2 for endyr+Nforecastyrs
0 # N individual STD years
0.0001 # final convergence criteria (e.g. 1.0e-04)
0 # retrospective year relative to end year (e.g. -4)
1 # min age for calc of summary biomass
1 # Depletion basis:  denom is: 0=skip; 1=rel X*B0; 2=rel X*Bmsy; 3=rel X*B_styr
1 # Fraction (X) for Depletion denominator (e.g. 0.4)
1 # SPR_report_basis:  0=skip; 1=(1-SPR)/(1-SPR_tgt); 2=(1-SPR)/(1-SPR_MSY); 3=(1-SPR)/(1-SPR_Btarget); 4=rawSPR
1 # F_report_units: 0=skip; 1=exploitation(Bio); 2=exploitation(Num); 3=sum(Frates)
0 # F_report_basis: 0=raw; 1=F/Fspr; 2=F/Fmsy ; 3=F/Fbtgt
999 # check value for end of file
";

pub const STARTER_EM: &str = "\
#V3.24U
em.dat
em.ctl
0 # 0=use init values in control file; 1=use ss3.par
0 # run display detail (0,1,2)
1 # detailed age-structured reports in REPORT.SSO (0,1)
0 # write detailed checkup.sso file (0,1)
0 # write parm values to ParmTrace.sso (0=no,1=good,active; 2=good,all; 3=every_iter,all_parms; 4=every,active)
1 # write to cumreport.sso (0=no,1=like&timeseries; 2=add survey fits)
1 # Include prior_like for non-estimated parameters (0,1)
1 # Use Soft Boundaries to aid convergence (0,1) (recommended)
1 # Number of datafiles to produce: 1st is input, 2nd is estimates, 3rd and higher are bootstrap
10 # Turn off estimation for parameters entering after this phase
0 # MCeval burn interval
1 # MCeval thin interval
0 # jitter initial parm value by this fraction
-1 # min yr for sdreport outputs (-1 for styr)
-2 # max yr for sdreport outputs (-1 for endyr; -2 for endyr+Nforecastyrs
0 # N individual STD years
0.0001 # final convergence criteria (e.g. 1.0e-04)
0 # retrospective year relative to end year (e.g. -4)
1 # min age for calc of summary biomass
1 # Depletion basis:  denom is: 0=skip; 1=rel X*B0; 2=rel X*Bmsy; 3=rel X*B_styr
1 # Fraction (X) for Depletion denominator (e.g. 0.4)
1 # SPR_report_basis:  0=skip; 1=(1-SPR)/(1-SPR_tgt); 2=(1-SPR)/(1-SPR_MSY); 3=(1-SPR)/(1-SPR_Btarget); 4=rawSPR
1 # F_report_units: 0=skip; 1=exploitation(Bio); 2=exploitation(Num); 3=sum(Frates)
0 # F_report_basis: 0=raw; 1=F/Fspr; 2=F/Fmsy ; 3=F/Fbtgt
999 # check value for end of file
";

pub const FORECAST: &str = "\
#V3.24U
#C generic forecast file
1 # Benchmarks: 0=skip; 1=calc F_spr,F_btgt,F_msy
2 # MSY: 1= set to F(SPR); 2=calc F(MSY); 3=set to F(Btgt); 4=set to F(endyr)
0.4 # SPR target (e.g. 0.40)
0.4 # Biomass target (e.g. 0.40)
0 # Forecast: 0=none; 1=F(SPR); 2=F(MSY) 3=F(Btgt); 4=Ave F (uses first-last relF yrs); 5=input annual F scalar
1 # N forecast years
999 # verify end of input
";

/// Operating-model parameter values, one slot per control parameter line, all
/// different from the control file's initial values.
pub const PAR: &str = "\
# Number of parameters = 19 Objective function value = 123.456 Maximum gradient component = 0.0001
# MGparm[1]:
0.11
# MGparm[2]:
21.5
# MGparm[3]:
131.2
# MGparm[4]:
0.21
# MGparm[5]:
0.12
# MGparm[6]:
1.1e-05
# MGparm[7]:
3.01
# SR_parm[1]:
18.9
# SR_parm[2]:
0.66
# SR_parm[3]:
0.41
# SR_parm[4]:
0.02
# SR_parm[5]:
0.03
# SR_parm[6]:
0.04
# init_F[1]:
0.05
# Q_parm[1]:
0.52
# selparm[1]:
50.5
# selparm[2]:
15.5
# selparm[3]:
40.5
# selparm[4]:
10.5
";

/// Write OM and EM base models under `dir/om` and `dir/em`.
pub fn write_base_models(dir: &Path) -> Result<BaseModels> {
    let om = write_model(
        &dir.join("om"),
        ModelFiles::om_default(),
        &[
            ("om.ctl", CONTROL),
            ("om.dat", DATA),
            ("starter.ss", STARTER_OM),
            ("forecast.ss", FORECAST),
            ("ss3.par", PAR),
        ],
    )?;
    let em = write_model(
        &dir.join("em"),
        ModelFiles::em_default(),
        &[
            ("em.ctl", CONTROL),
            ("em.dat", DATA),
            ("starter.ss", STARTER_EM),
            ("forecast.ss", FORECAST),
        ],
    )?;
    Ok(BaseModels { om, em })
}

fn write_model(dir: &Path, files: ModelFiles, contents: &[(&str, &str)]) -> Result<BaseModel> {
    fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    for (name, text) in contents {
        fs::write(dir.join(name), text).with_context(|| format!("write {name}"))?;
    }
    Ok(BaseModel {
        dir: dir.to_path_buf(),
        files,
    })
}

/// Biomass the scripted solver reports for `year`.
pub fn scripted_biomass(styr: i32, year: i32) -> f64 {
    1000.0 - 10.0 * f64::from(year - styr)
}

/// Solver stand-in that writes a report and parameter file derived from the model.
///
/// Parameter values come from `ss3.par` when the starter says to use it, otherwise from
/// the control file's initial values (and a fresh `ss3.par` is written). Runs listed
/// with [`ScriptedSolver::failing`] exit with code 1 and write nothing.
#[derive(Debug, Default)]
pub struct ScriptedSolver {
    failures: Vec<(String, u32, ModelKind)>,
    calls: Mutex<Vec<SolveRequest>>,
}

impl ScriptedSolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(mut self, scenario: &str, iteration: u32, model: ModelKind) -> Self {
        self.failures.push((scenario.to_string(), iteration, model));
        self
    }

    /// Requests seen so far, in call order.
    pub fn calls(&self) -> Vec<SolveRequest> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn outcome(request: &SolveRequest, status: SolveStatus) -> SolveOutcome {
        let artifacts = if status == SolveStatus::Ok {
            vec![request.workdir.join(PAR_FILE), request.workdir.join(REPORT_FILE)]
        } else {
            Vec::new()
        };
        SolveOutcome {
            model: request.model,
            mode: request.mode,
            status,
            log_path: request.workdir.join(SOLVER_LOG),
            artifacts,
        }
    }
}

impl Solver for ScriptedSolver {
    fn solve(&self, request: &SolveRequest) -> Result<SolveOutcome> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
        let dir = &request.workdir;
        fs::write(dir.join(SOLVER_LOG), format!("scripted solver {:?}\n", request.mode))
            .context("write solver log")?;

        let failing = self.failures.iter().any(|(scenario, iteration, model)| {
            *scenario == request.scenario
                && *iteration == request.iteration
                && *model == request.model
        });
        if failing {
            return Ok(Self::outcome(request, SolveStatus::Exited { code: Some(1) }));
        }

        let starter = read_document(&dir.join("starter.ss"))?;
        let (dat_name, ctl_name) =
            model_file_names(&starter).context("starter names no data and control files")?;
        let ctl = read_document(&dir.join(ctl_name))?;
        let dat = read_document(&dir.join(dat_name))?;

        let params = control_parameters(&ctl);
        let par_path = dir.join(PAR_FILE);
        let values = if use_par(&starter)? && par_path.is_file() {
            let par = ParFile::parse(&read_document(&par_path)?)?;
            if par.slot_count() != params.len() {
                return Ok(Self::outcome(request, SolveStatus::Exited { code: Some(2) }));
            }
            par.slots().into_iter().map(str::to_string).collect()
        } else {
            let values: Vec<String> = params.iter().map(|(_, init)| init.clone()).collect();
            fs::write(&par_path, render_par(&values)).context("write ss3.par")?;
            values
        };

        let (styr, endyr) = model_years(&dat)?;
        fs::write(
            dir.join(REPORT_FILE),
            render_report(&params, &values, styr, endyr),
        )
        .context("write Report.sso")?;

        Ok(Self::outcome(request, SolveStatus::Ok))
    }
}

/// `(label, INIT)` for every parameter line, in file order.
fn control_parameters(ctl: &Document) -> Vec<(String, String)> {
    ctl.lines()
        .iter()
        .filter_map(|line| {
            let parsed = ValueLine::split(line);
            if parsed.values.len() < 7 {
                return None;
            }
            let label = parsed.label()?;
            Some((label.to_string(), parsed.values[2].to_string()))
        })
        .collect()
}

fn render_par(values: &[String]) -> String {
    let mut out = format!(
        "# Number of parameters = {} Objective function value = 0 Maximum gradient component = 0\n",
        values.len()
    );
    for (index, value) in values.iter().enumerate() {
        out.push_str(&format!("# parm[{}]:\n{value}\n", index + 1));
    }
    out
}

fn render_report(params: &[(String, String)], values: &[String], styr: i32, endyr: i32) -> String {
    let mut out = String::from("#V3.24U scripted\nPARAMETERS\n");
    out.push_str("Num Label Value Active_Cnt Phase Min Max Init Status Parm_StDev\n");
    for (index, ((label, init), value)) in params.iter().zip(values).enumerate() {
        out.push_str(&format!(
            "{} {label} {value} _ _ _ _ {init} _ _\n",
            index + 1
        ));
    }
    out.push_str("\nTIME_SERIES\nArea Yr Era Seas Bio_all Bio_smry SpawnBio\n");
    let virgin = scripted_biomass(styr, styr);
    out.push_str(&format!("1 {} VIRG 1 {virgin} {virgin} {virgin}\n", styr - 1));
    for year in styr..=endyr {
        let bio = scripted_biomass(styr, year);
        out.push_str(&format!(
            "1 {year} TIME 1 {} {} {}\n",
            format_number(bio),
            format_number(bio * 0.9),
            format_number(bio * 0.5)
        ));
    }
    let fore = scripted_biomass(styr, endyr + 1);
    out.push_str(&format!("1 {} FORE 1 {fore} {fore} {fore}\n\n", endyr + 1));
    out
}
