//! Mock agents of the renewable-energy deployment, grouped by business unit.
//!
//! Every agent is deterministic and reads only `mock_data`. The standard
//! pipeline uses the data, analysis, ranking and insights teams; the
//! competitive pipeline adds the research and expert teams and a peer panel.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use conclave_contracts::{
    agent::{AgentDescriptor, ExecutionModel},
    capability::Capability,
    error::{AgentError, ConclaveResult},
    view::{StateView, CURRENT_CONTEXT, CURRENT_ITEM_ID},
};
use conclave_core::{traits::ToolRunnable, AgentRegistry, RawAgentUnit, RegistrationPolicy};
use conclave_engine::fields;
use conclave_ranking::keys;

use crate::{
    mock_data::{
        candidate_sites, country_profile, defense_bonus, investment_score, lens_score, research_brief,
        site_metrics, ReviewLens,
    },
    COUNTRY_METRICS,
};

/// A descriptor and the unit it describes, ready for registration.
pub type AgentPart = (AgentDescriptor, RawAgentUnit);

const AGENT_TIMEOUT: Duration = Duration::from_secs(30);

fn descriptor(id: &str, name: &str, model: ExecutionModel, unit: &str, capability: Capability) -> AgentDescriptor {
    AgentDescriptor::new(id, name, model)
        .version("1.0.0")
        .business_unit(unit)
        .capability(capability)
        .timeout(AGENT_TIMEOUT)
}

fn item_id(view: &StateView) -> Result<&str, AgentError> {
    view.item_id()
        .ok_or_else(|| AgentError::missing_input(&[CURRENT_ITEM_ID.to_string()]))
}

// ── Data team ─────────────────────────────────────────────────────────────────

/// Loads one solar and one wind candidate site per country.
pub fn site_loader() -> AgentPart {
    let d = descriptor("site-loader", "Site Loader", ExecutionModel::PlainFunction, "data_team", Capability::DataLoad)
        .description("Loads candidate solar and wind sites for a country")
        .produces(fields::LOCATIONS)
        .tag("sites");
    let unit = RawAgentUnit::sync_fn(|view| {
        let code = item_id(view)?;
        let sites = candidate_sites(code).ok_or_else(|| AgentError::execution(format!("no site data for {code}")))?;
        Ok(json!({ "locations": sites }))
    });
    (d, unit)
}

// ── Analysis team ─────────────────────────────────────────────────────────────

/// Computes IRR, LCOE and NPV for one site.
pub fn site_analyzer() -> AgentPart {
    let d = descriptor(
        "site-analyzer",
        "Site Financial Analyzer",
        ExecutionModel::PlainFunction,
        "analysis_team",
        Capability::Analysis,
    )
    .description("Project-finance metrics (IRR, LCOE, NPV) for a candidate site")
    .produces(fields::METRICS)
    .tag("finance");
    let unit = RawAgentUnit::sync_fn(|view| {
        let site = view.item().ok_or_else(|| AgentError::missing_input(&["current_item".to_string()]))?;
        let metrics = site_metrics(site).ok_or_else(|| AgentError::malformed("site record is missing financial inputs"))?;
        Ok(json!({ "metrics": metrics }))
    });
    (d, unit)
}

// ── Ranking team ──────────────────────────────────────────────────────────────

/// Ranks countries by investment score over their aggregated metrics.
pub fn country_ranker() -> AgentPart {
    let d = descriptor("country-ranker", "Country Ranker", ExecutionModel::PlainFunction, "ranking_team", Capability::Ranking)
        .description("Ranks countries by a weighted IRR and LCOE investment score")
        .requires(COUNTRY_METRICS)
        .produces(fields::RANKING);
    let unit = RawAgentUnit::sync_fn(|view| {
        let metrics = view
            .get(COUNTRY_METRICS)
            .and_then(Value::as_object)
            .ok_or_else(|| AgentError::malformed("country metrics are not a keyed object"))?;

        let mut scored: Vec<(&String, f64)> = metrics
            .iter()
            .filter_map(|(code, m)| investment_score(m).map(|s| (code, s)))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));

        let ranking: Vec<Value> = scored
            .iter()
            .enumerate()
            .map(|(i, (code, score))| json!({ "entity": code, "score": score, "rank": i + 1 }))
            .collect();
        Ok(json!({ "ranking": ranking }))
    });
    (d, unit)
}

/// Three reviewers scoring from the finance, policy and grid perspective.
pub fn peer_panel() -> Vec<AgentPart> {
    vec![
        peer_reviewer("finance-reviewer", "Finance Reviewer", ReviewLens::Finance),
        peer_reviewer("policy-reviewer", "Policy Reviewer", ReviewLens::Policy),
        peer_reviewer("grid-reviewer", "Grid Reviewer", ReviewLens::Grid),
    ]
}

/// Scores every presentation in the initial round; in hot-seat rounds,
/// re-scores only the hot seat, crediting persuasive defenses.
pub fn peer_reviewer(id: &str, name: &str, lens: ReviewLens) -> AgentPart {
    let d = descriptor(id, name, ExecutionModel::PlainFunction, "ranking_team", Capability::PeerReview)
        .description("Scores expert presentations from one perspective")
        .produces(keys::SCORES)
        .tag("peer");
    let unit = RawAgentUnit::sync_fn(move |view| {
        let round = view.get(keys::ROUND).and_then(Value::as_u64).unwrap_or(0);
        let targets: Vec<String> = if round == 0 {
            view.state().entities()
        } else {
            view.get(keys::HOT_SEAT)
                .and_then(Value::as_array)
                .map(|hot| hot.iter().filter_map(Value::as_str).map(str::to_string).collect())
                .unwrap_or_default()
        };

        let mut scores = Map::new();
        for code in targets {
            let Some(base) = lens_score(lens, &code) else {
                continue;
            };
            let defended = view.get(keys::DEFENSES).is_some_and(|d| !d[code.as_str()].is_null());
            let score = if round > 0 && defended { base + defense_bonus(&code) } else { base };
            scores.insert(code, json!(score));
        }
        Ok(json!({ "scores": scores }))
    });
    (d, unit)
}

/// Questions a hot-seat candidate on its weakest dimension.
pub fn challenger() -> AgentPart {
    let d = descriptor("challenger", "Devil's Advocate", ExecutionModel::PlainFunction, "ranking_team", Capability::Challenge)
        .description("Raises the strongest objection to a candidate's case")
        .produces(keys::CHALLENGE);
    let unit = RawAgentUnit::sync_fn(|view| {
        let code = item_id(view)?;
        let by = view.get_str(keys::CHALLENGER).unwrap_or("the panel");
        let weakness = match country_profile(code) {
            Some(p) if p.grid_readiness < p.policy_support => "grid integration",
            Some(_) => "policy stability",
            None => "data coverage",
        };
        Ok(json!({ "challenge": format!("{by}: how does {code} address {weakness} risk?") }))
    });
    (d, unit)
}

// ── Expert team ───────────────────────────────────────────────────────────────

/// Answers the challenges raised against one candidate.
pub fn defender() -> AgentPart {
    let d = descriptor("country-advocate", "Country Advocate", ExecutionModel::PlainFunction, "expert_team", Capability::Defense)
        .description("Defends a country's case against the panel's challenges")
        .produces(keys::DEFENSE);
    let unit = RawAgentUnit::sync_fn(|view| {
        let code = item_id(view)?;
        let count = view.get(keys::CHALLENGES).and_then(Value::as_array).map_or(0, Vec::len);
        let support = country_profile(code).map_or(0.0, |p| p.policy_support);
        Ok(json!({
            "defense": format!("{code} answers {count} challenges, citing policy support of {support:.1}/10")
        }))
    });
    (d, unit)
}

/// A template chain standing in for an LLM chain: renders its input field
/// into prose.
struct TemplateChain {
    input_key: &'static str,
    render: fn(&Value) -> String,
}

#[async_trait]
impl ToolRunnable for TemplateChain {
    async fn run(&self, input: Value) -> Result<Value, AgentError> {
        Ok(Value::String((self.render)(&input[self.input_key])))
    }
}

fn render_presentation(research: &Value) -> String {
    match research["name"].as_str() {
        Some(name) => {
            let summary = research["summary"].as_str().unwrap_or_default();
            match research["supplied_context"].as_str() {
                Some(context) => format!("The case for {name}: {summary} Field research adds: {context}"),
                None => format!("The case for {name}: {summary}"),
            }
        }
        None => "No research was available for this candidate.".to_string(),
    }
}

/// Turns a research bundle into an expert presentation (tool-augmented).
pub fn expert_presenter() -> AgentPart {
    let d = descriptor(
        "expert-presenter",
        "Country Expert",
        ExecutionModel::ToolAugmented,
        "expert_team",
        Capability::ExpertPresentation,
    )
    .description("Presents the investment case for one country")
    .produces(keys::PRESENTATION)
    .tag("llm");
    let unit = RawAgentUnit::tool_chain(
        Arc::new(TemplateChain {
            input_key: keys::CURRENT_RESEARCH,
            render: render_presentation,
        }),
        keys::CURRENT_RESEARCH,
        keys::PRESENTATION,
        vec!["market_lookup".to_string()],
    );
    (d, unit)
}

// ── Research team ─────────────────────────────────────────────────────────────

/// Compiles a research bundle per country, folding in supplied context.
pub fn researcher() -> AgentPart {
    let d = descriptor("researcher", "Market Researcher", ExecutionModel::PlainFunction, "research_team", Capability::Research)
        .description("Compiles a research brief for a country")
        .produces(keys::RESEARCH)
        .tag("research");
    let unit = RawAgentUnit::function(|view: StateView| async move {
        let code = item_id(&view)?.to_string();
        let mut brief = research_brief(&code).ok_or_else(|| AgentError::execution(format!("no research sources for {code}")))?;
        if let Some(context) = view.get_str(CURRENT_CONTEXT) {
            brief["supplied_context"] = Value::String(context.to_string());
        }
        Ok::<_, AgentError>(json!({ "research": brief }))
    });
    (d, unit)
}

// ── Insights team ─────────────────────────────────────────────────────────────

fn render_insights(ranking: &Value) -> String {
    let active: Vec<&Value> = ranking
        .as_array()
        .map(|entries| entries.iter().filter(|e| !e["eliminated"].as_bool().unwrap_or(false)).collect())
        .unwrap_or_default();
    match active.as_slice() {
        [] => "No ranking was produced.".to_string(),
        [only] => format!("{} is the only remaining candidate.", only["entity"].as_str().unwrap_or("?")),
        [first, second, ..] => format!(
            "{} leads with a score of {:.2}, ahead of {} at {:.2}.",
            first["entity"].as_str().unwrap_or("?"),
            first["score"].as_f64().unwrap_or_default(),
            second["entity"].as_str().unwrap_or("?"),
            second["score"].as_f64().unwrap_or_default(),
        ),
    }
}

/// Narrates the final ranking (tool-augmented).
pub fn insight_narrator() -> AgentPart {
    let d = descriptor(
        "insight-narrator",
        "Insight Narrator",
        ExecutionModel::ToolAugmented,
        "insights_team",
        Capability::Explanation,
    )
    .description("Explains the final ranking in plain language")
    .requires(fields::RANKING)
    .produces(fields::INSIGHTS)
    .tag("llm");
    let unit = RawAgentUnit::tool_chain(
        Arc::new(TemplateChain {
            input_key: fields::RANKING,
            render: render_insights,
        }),
        fields::RANKING,
        fields::INSIGHTS,
        Vec::new(),
    );
    (d, unit)
}

// ── Registries ────────────────────────────────────────────────────────────────

pub fn standard_agents() -> Vec<AgentPart> {
    vec![site_loader(), site_analyzer(), country_ranker(), insight_narrator()]
}

pub fn competitive_agents() -> Vec<AgentPart> {
    let mut parts = vec![researcher(), expert_presenter(), challenger(), defender(), insight_narrator()];
    parts.extend(peer_panel());
    parts
}

/// Every agent of the deployment, each registered once.
pub fn all_agents() -> Vec<AgentPart> {
    let mut parts = standard_agents();
    parts.extend(
        competitive_agents()
            .into_iter()
            .filter(|(d, _)| !d.has_capability(Capability::Explanation)),
    );
    parts
}

/// Register `parts` into a fresh registry under `on_duplicate`.
///
/// # Errors
///
/// Propagates registration failures such as duplicate ids.
pub fn build_registry(parts: Vec<AgentPart>, on_duplicate: RegistrationPolicy) -> ConclaveResult<AgentRegistry> {
    let mut registry = AgentRegistry::with_policy(on_duplicate);
    for (descriptor, unit) in parts {
        registry.register(descriptor, unit)?;
    }
    Ok(registry)
}
