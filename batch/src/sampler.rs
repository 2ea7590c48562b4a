//! Survey index sampling from the operating model's true biomass.
//!
//! Observations are bias-corrected lognormal draws, `truth * exp(e)` with
//! `e ~ N(-sd^2 / 2, sd)`, so their expectation equals the true value.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use engine::core::document::Document;
use engine::core::error::SimError;
use engine::core::mutators::index::{IndexDesign, IndexObservation, write_index};
use engine::core::report::time_series;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, LogNormal};
use tracing::debug;

/// RNG for one iteration.
pub fn unit_rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

/// Draw one observation per sampled year for `fleet`.
pub fn draw(
    design: &IndexDesign,
    fleet: u32,
    truth: &BTreeMap<i32, f64>,
    rng: &mut StdRng,
) -> Result<Vec<IndexObservation>> {
    let years = design.years();
    let sds = design.sds()?;
    let mut observations = Vec::with_capacity(years.len());
    for (year, sd) in years.into_iter().zip(sds) {
        let value = truth.get(&year).copied().ok_or_else(|| {
            SimError::contract(format!(
                "index year {year} is outside the operating model's {} series",
                design.series
            ))
        })?;
        if !(value.is_finite() && value > 0.0) {
            return Err(SimError::contract(format!(
                "true {} for {year} is {value}; lognormal sampling needs a positive value",
                design.series
            ))
            .into());
        }
        let dist = LogNormal::new(value.ln() - sd * sd / 2.0, sd)
            .with_context(|| format!("lognormal for {year} with sd {sd}"))?;
        observations.push(IndexObservation {
            year,
            season: design.season,
            fleet,
            value: dist.sample(rng),
            sd,
        });
    }
    Ok(observations)
}

/// Sample every fleet of `design` from `report` and write the rows into `dat`.
pub fn sample_index(
    design: &IndexDesign,
    report: &Document,
    dat: &Document,
    rng: &mut StdRng,
) -> Result<Document> {
    let truth = time_series(report, &design.series)?;
    let mut out = dat.clone();
    for &fleet in &design.fleets {
        let observations = draw(design, fleet, &truth, rng)?;
        debug!(fleet, rows = observations.len(), "sampled index");
        out = write_index(&out, fleet, &observations)
            .with_context(|| format!("write index for fleet {fleet}"))?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine::core::error::ErrorKind;
    use engine::core::fields::field;
    use engine::core::mutators::index::OBS_COUNT;
    use engine::test_support::{DATA, scripted_biomass};

    fn design(sd: f64) -> IndexDesign {
        IndexDesign {
            fleets: vec![2],
            start: 1972,
            end: 1980,
            frequency: 2,
            sd: vec![sd],
            season: 1,
            series: "Bio_all".into(),
        }
    }

    fn truth() -> BTreeMap<i32, f64> {
        (1971..=1980)
            .map(|year| (year, scripted_biomass(1971, year)))
            .collect()
    }

    #[test]
    fn same_seed_gives_same_observations() {
        let a = draw(&design(0.2), 2, &truth(), &mut unit_rng(7)).expect("draw");
        let b = draw(&design(0.2), 2, &truth(), &mut unit_rng(7)).expect("draw");
        let c = draw(&design(0.2), 2, &truth(), &mut unit_rng(8)).expect("draw");
        assert_eq!(a, b);
        assert_ne!(a, c);
        let years: Vec<i32> = a.iter().map(|obs| obs.year).collect();
        assert_eq!(years, vec![1972, 1974, 1976, 1978, 1980]);
    }

    #[test]
    fn observations_center_on_truth() {
        let design = IndexDesign {
            start: 1971,
            end: 1971,
            frequency: 1,
            ..design(0.1)
        };
        let truth = truth();
        let mut rng = unit_rng(42);
        let n = 4000;
        let mean = (0..n)
            .map(|_| draw(&design, 2, &truth, &mut rng).expect("draw")[0].value)
            .sum::<f64>()
            / f64::from(n);
        assert!((mean - 1000.0).abs() < 10.0, "mean {mean}");
    }

    #[test]
    fn year_outside_series_is_a_contract_violation() {
        let design = IndexDesign {
            end: 1990,
            ..design(0.2)
        };
        let err = draw(&design, 2, &truth(), &mut unit_rng(1)).expect_err("1982");
        assert_eq!(ErrorKind::of(&err), ErrorKind::ContractViolation);
    }

    #[test]
    fn writes_rows_into_data_file() {
        let report = Document::parse(
            "Report.sso",
            "TIME_SERIES\nArea Yr Era Seas Bio_all\n1 1972 TIME 1 900\n1 1974 TIME 1 880\n1 1976 TIME 1 860\n1 1978 TIME 1 840\n1 1980 TIME 1 820\n",
        );
        let dat = Document::parse("em.dat", DATA);
        let out = sample_index(&design(0.2), &report, &dat, &mut unit_rng(3)).expect("sample");
        let line = out.locate(OBS_COUNT).expect("count");
        assert_eq!(field::<usize>(&out, line, 0, "").expect("count"), 5);
    }
}
