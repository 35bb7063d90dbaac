//! Simulated renewable-energy data for the Conclave reference deployment.
//!
//! All data in this module is hardcoded and approximate. No external systems
//! are contacted. The profiles stand in for resource databases and market
//! feeds a production deployment would query; the financial model is a
//! deliberately small single-project cash-flow model.

use serde_json::{json, Value};

// ── Country profiles (mock) ───────────────────────────────────────────────────

/// Resource and market profile of one country.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CountryProfile {
    pub code: &'static str,
    pub name: &'static str,
    /// Average solar PV capacity factor.
    pub solar_cf: f64,
    /// Average onshore wind capacity factor.
    pub wind_cf: f64,
    /// Installed cost, USD per kW.
    pub solar_capex: f64,
    pub wind_capex: f64,
    /// Offtake price, USD per MWh.
    pub tariff: f64,
    /// Policy support on a 0-10 scale.
    pub policy_support: f64,
    /// Grid readiness on a 0-10 scale.
    pub grid_readiness: f64,
}

const PROFILES: &[CountryProfile] = &[
    profile("USA", "United States", 0.24, 0.36, 1100.0, 1400.0, 62.0, 7.5, 8.0),
    profile("IND", "India", 0.21, 0.28, 650.0, 1050.0, 48.0, 8.0, 5.5),
    profile("CHN", "China", 0.18, 0.27, 620.0, 1000.0, 45.0, 8.5, 7.0),
    profile("BRA", "Brazil", 0.23, 0.42, 850.0, 1250.0, 55.0, 6.5, 6.0),
    profile("DEU", "Germany", 0.11, 0.30, 950.0, 1500.0, 85.0, 8.0, 9.0),
    profile("JPN", "Japan", 0.14, 0.22, 1300.0, 2100.0, 90.0, 6.0, 8.5),
    profile("GBR", "United Kingdom", 0.10, 0.38, 1000.0, 1600.0, 80.0, 7.5, 8.5),
    profile("FRA", "France", 0.14, 0.26, 1000.0, 1500.0, 75.0, 7.0, 8.5),
    profile("CAN", "Canada", 0.14, 0.33, 1200.0, 1500.0, 58.0, 6.5, 8.0),
    profile("AUS", "Australia", 0.26, 0.35, 900.0, 1450.0, 60.0, 6.0, 7.0),
    profile("ZAF", "South Africa", 0.25, 0.33, 800.0, 1300.0, 65.0, 5.5, 4.5),
    profile("MEX", "Mexico", 0.25, 0.35, 750.0, 1200.0, 52.0, 4.5, 5.5),
    profile("ESP", "Spain", 0.20, 0.27, 700.0, 1200.0, 68.0, 8.0, 8.0),
    profile("ITA", "Italy", 0.17, 0.23, 900.0, 1500.0, 82.0, 6.5, 7.5),
];

#[allow(clippy::too_many_arguments)]
const fn profile(
    code: &'static str,
    name: &'static str,
    solar_cf: f64,
    wind_cf: f64,
    solar_capex: f64,
    wind_capex: f64,
    tariff: f64,
    policy_support: f64,
    grid_readiness: f64,
) -> CountryProfile {
    CountryProfile {
        code,
        name,
        solar_cf,
        wind_cf,
        solar_capex,
        wind_capex,
        tariff,
        policy_support,
        grid_readiness,
    }
}

/// Look up the profile for an ISO3 code.
pub fn country_profile(code: &str) -> Option<&'static CountryProfile> {
    PROFILES.iter().find(|p| p.code == code)
}

/// Every ISO3 code with a profile, in table order.
pub fn known_countries() -> Vec<&'static str> {
    PROFILES.iter().map(|p| p.code).collect()
}

// ── Candidate sites (mock) ────────────────────────────────────────────────────

const SOLAR_MW: f64 = 100.0;
const WIND_MW: f64 = 150.0;

/// One solar and one wind site for the country, or `None` if it has no profile.
pub fn candidate_sites(code: &str) -> Option<Value> {
    let p = country_profile(code)?;
    Some(json!([
        {
            "id": format!("{code}-solar-01"),
            "entity": code,
            "technology": "solar",
            "capacity_mw": SOLAR_MW,
            "capacity_factor": p.solar_cf,
            "capex_usd_kw": p.solar_capex,
            "tariff_usd_mwh": p.tariff,
        },
        {
            "id": format!("{code}-wind-01"),
            "entity": code,
            "technology": "wind",
            "capacity_mw": WIND_MW,
            "capacity_factor": p.wind_cf,
            "capex_usd_kw": p.wind_capex,
            "tariff_usd_mwh": p.tariff,
        }
    ]))
}

// ── Project finance (mock) ────────────────────────────────────────────────────

const LIFETIME_YEARS: i32 = 25;
const DISCOUNT_RATE: f64 = 0.08;
const OPEX_SHARE: f64 = 0.02;
const HOURS_PER_YEAR: f64 = 8760.0;

fn annuity(rate: f64, years: i32) -> f64 {
    if rate.abs() < 1e-9 {
        return f64::from(years);
    }
    (1.0 - (1.0 + rate).powi(-years)) / rate
}

/// IRR by bisection on a level annual cash flow against an upfront cost.
fn internal_rate(capex: f64, cash: f64) -> f64 {
    let npv = |r: f64| cash * annuity(r, LIFETIME_YEARS) - capex;
    let (mut lo, mut hi) = (-0.5, 1.0);
    if npv(lo) < 0.0 {
        return lo;
    }
    if npv(hi) > 0.0 {
        return hi;
    }
    for _ in 0..80 {
        let mid = (lo + hi) / 2.0;
        if npv(mid) > 0.0 {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    (lo + hi) / 2.0
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Financial metrics of one site: IRR in percent, LCOE in USD/MWh and NPV
/// in USD millions. Returns `None` when a site field is missing.
pub fn site_metrics(site: &Value) -> Option<Value> {
    let capacity_mw = site["capacity_mw"].as_f64()?;
    let cf = site["capacity_factor"].as_f64()?;
    let capex_kw = site["capex_usd_kw"].as_f64()?;
    let tariff = site["tariff_usd_mwh"].as_f64()?;

    let energy_mwh = capacity_mw * cf * HOURS_PER_YEAR;
    let capex = capacity_mw * 1000.0 * capex_kw;
    let opex = capex * OPEX_SHARE;
    let cash = energy_mwh * tariff - opex;
    let af = annuity(DISCOUNT_RATE, LIFETIME_YEARS);

    let npv = cash * af - capex;
    let lcoe = (capex / af + opex) / energy_mwh;
    let irr = internal_rate(capex, cash);

    Some(json!({
        "entity": site["entity"],
        "site": site["id"],
        "technology": site["technology"],
        "irr": round2(irr * 100.0),
        "lcoe": round2(lcoe),
        "npv": round2(npv / 1e6),
    }))
}

/// Investment score of a country from its aggregated metrics. Higher is better.
pub fn investment_score(metrics: &Value) -> Option<f64> {
    let irr = metrics["irr"].as_f64()?;
    let lcoe = metrics["lcoe"].as_f64()?;
    Some(round2(irr * 0.7 + (60.0 - lcoe).max(0.0) * 0.1))
}

// ── Expert panel (mock) ───────────────────────────────────────────────────────

/// The perspective a peer reviewer scores from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewLens {
    Finance,
    Policy,
    Grid,
}

/// A 0-10 score for the country under `lens`.
pub fn lens_score(lens: ReviewLens, code: &str) -> Option<f64> {
    let p = country_profile(code)?;
    let score = match lens {
        ReviewLens::Finance => {
            let resource = (p.solar_cf + p.wind_cf) * 12.0;
            let price = p.tariff / 15.0;
            let cost = (p.solar_capex + p.wind_capex) / 800.0;
            resource + price - cost
        }
        ReviewLens::Policy => p.policy_support,
        ReviewLens::Grid => p.grid_readiness,
    };
    Some(round2(score.clamp(0.0, 10.0)))
}

/// Score gained by a defended candidate when re-scored. Strong policy
/// support makes a defense persuasive.
pub fn defense_bonus(code: &str) -> f64 {
    match country_profile(code) {
        Some(p) if p.policy_support >= 7.5 => 0.25,
        _ => 0.0,
    }
}

/// A short research brief for the country.
pub fn research_brief(code: &str) -> Option<Value> {
    let p = country_profile(code)?;
    Some(json!({
        "entity": p.code,
        "name": p.name,
        "summary": format!(
            "{} pairs a {:.0}% solar and {:.0}% wind capacity factor with a ${:.0}/MWh offtake price.",
            p.name,
            p.solar_cf * 100.0,
            p.wind_cf * 100.0,
            p.tariff
        ),
        "policy_support": p.policy_support,
        "grid_readiness": p.grid_readiness,
    }))
}
