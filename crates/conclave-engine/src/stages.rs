//! Built-in stage actions.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{json, Map, Number, Value};
use tracing::{debug, info};

use conclave_contracts::{
    error::{ConclaveError, ConclaveResult},
    ranking::parse_ranking,
    state::{ErrorRecord, PartialUpdate, Stage, WarningKind},
    view::{CURRENT_CONTEXT, CURRENT_ITEM, CURRENT_ITEM_ID},
};
use conclave_policy::{evaluate_verification, VerifyFacts, VerifyOutcome};
use conclave_verify::{top_gap, RankingVerifier};

use crate::{
    context::StageContext,
    definition::{fields, FanOut, OnMissing, Selection, StageAction, WorkflowDefinition},
    fanout::{flat_update, keyed_update, FanOutTask},
};

/// Run one stage action against the context's snapshot.
pub(crate) async fn run_action(
    action: &StageAction,
    ctx: &mut StageContext<'_>,
    definition: &WorkflowDefinition,
) -> ConclaveResult<PartialUpdate> {
    match action {
        StageAction::Validate => validate(ctx, definition),
        StageAction::Invoke {
            capability,
            selection,
            fan_out,
            on_missing,
        } => {
            let agents = ctx.resolve(*capability);
            if agents.is_empty() {
                return match on_missing {
                    OnMissing::Fail => Err(ConclaveError::NoAgentForCapability {
                        capability: *capability,
                    }),
                    OnMissing::Skip => {
                        ctx.warn(
                            WarningKind::MissingAgent,
                            format!("no enabled agent provides '{capability}'; stage skipped"),
                        );
                        Ok(PartialUpdate::new())
                    }
                };
            }
            let agents = match selection {
                Selection::First => agents.into_iter().take(1).collect(),
                Selection::All => agents,
            };
            invoke(ctx, agents, fan_out).await
        }
        StageAction::Aggregate {
            source,
            into,
            group_by,
        } => aggregate(ctx, source, into, group_by),
        StageAction::Verify { field, source } => verify(ctx, definition, field, *source),
        StageAction::Retry { target } => {
            ctx.bump(fields::RETRIES);
            let retry = ctx.state().counter(fields::RETRIES) + 1;
            info!(stage = %ctx.stage(), target = %target, retry, "retrying stage");
            match definition.stage(*target).map(|d| &d.action) {
                Some(StageAction::Invoke {
                    capability,
                    selection,
                    fan_out,
                    ..
                }) => {
                    let agents = ctx.require_agents(*capability)?;
                    let agents = match selection {
                        Selection::First => agents.into_iter().take(1).collect(),
                        Selection::All => agents,
                    };
                    invoke(ctx, agents, fan_out).await
                }
                Some(StageAction::Procedure(procedure)) => procedure.execute(ctx).await,
                _ => Err(ConclaveError::InvalidWorkflow {
                    reason: format!("retry target {target} has no agent action"),
                }),
            }
        }
        StageAction::DualRecommendation => Ok(dual_recommendation(ctx)),
        StageAction::Procedure(procedure) => procedure.execute(ctx).await,
        StageAction::Terminal => Ok(PartialUpdate::new()),
    }
}

// ── Validate ──────────────────────────────────────────────────────────────────

fn validate(ctx: &mut StageContext<'_>, definition: &WorkflowDefinition) -> ConclaveResult<PartialUpdate> {
    let report = definition.validator().validate(ctx.state());
    if !report.passed {
        return Err(ConclaveError::Validation {
            reason: report.summary(),
        });
    }
    debug!(entities = ctx.state().entities().len(), "inputs validated");

    if ctx.state().has_research_context() {
        for entity in ctx.state().entities() {
            if ctx.state().research_context(&entity).is_none() {
                ctx.warn(
                    WarningKind::MissingContext,
                    format!("no research context supplied for '{entity}'"),
                );
            }
        }
    }
    Ok(PartialUpdate::new())
}

// ── Invoke ────────────────────────────────────────────────────────────────────

async fn invoke(
    ctx: &mut StageContext<'_>,
    agents: Vec<conclave_core::Agent>,
    fan_out: &FanOut,
) -> ConclaveResult<PartialUpdate> {
    let items: Vec<(String, Value, Option<String>)> = match fan_out {
        FanOut::None => {
            let tasks = agents
                .into_iter()
                .map(|agent| FanOutTask::new(agent.id().as_str(), agent.clone(), ctx.view()))
                .collect();
            let results = ctx.fan_out(tasks).await?;
            return Ok(flat_update(&results));
        }
        FanOut::Entities => ctx
            .state()
            .entities()
            .into_iter()
            .map(|e| (e.clone(), Value::String(e.clone()), Some(e)))
            .collect(),
        FanOut::Field { field } => field_items(ctx, field),
    };

    let mut tasks = Vec::with_capacity(items.len() * agents.len());
    for (id, item, entity) in &items {
        for agent in &agents {
            let mut view = ctx
                .view()
                .with(CURRENT_ITEM, item.clone())
                .with(CURRENT_ITEM_ID, Value::String(id.clone()));
            if let Some(context) = entity.as_deref().and_then(|e| ctx.state().research_context(e)) {
                view = view.with(CURRENT_CONTEXT, Value::String(context.to_string()));
            }
            tasks.push(FanOutTask::new(id.clone(), agent.clone(), view));
        }
    }
    debug!(stage = %ctx.stage(), items = items.len(), tasks = tasks.len(), "fanning out");

    let results = ctx.fan_out(tasks).await?;
    Ok(keyed_update(&results))
}

/// Items of a keyed field of arrays: `{entity: [elem, ...]}`. Each element's
/// id is its `"id"` string, or `"{entity}/{index}"`. An `"id"` shared by
/// several elements is qualified as `"{entity}/{id}"` (plus `#{index}` when it
/// repeats within one entity), so every item keeps its own slot in the keyed
/// merge. Null groups and null elements are skipped.
fn field_items(ctx: &StageContext<'_>, field: &str) -> Vec<(String, Value, Option<String>)> {
    let Some(Value::Object(groups)) = ctx.state().field(field) else {
        return Vec::new();
    };
    let elements: Vec<(&String, usize, &Value)> = groups
        .iter()
        .filter_map(|(entity, group)| group.as_array().map(|elements| (entity, elements)))
        .flat_map(|(entity, elements)| elements.iter().enumerate().map(move |(i, elem)| (entity, i, elem)))
        .filter(|(_, _, elem)| !elem.is_null())
        .collect();

    let explicit = |elem: &Value| elem.get("id").and_then(Value::as_str).map(str::to_string);
    let mut uses: BTreeMap<String, usize> = BTreeMap::new();
    for (_, _, elem) in &elements {
        if let Some(id) = explicit(*elem) {
            *uses.entry(id).or_insert(0) += 1;
        }
    }

    let mut seen = BTreeSet::new();
    let mut items = Vec::with_capacity(elements.len());
    for (entity, i, elem) in elements {
        let mut id = match explicit(elem) {
            Some(id) if uses.get(&id).copied().unwrap_or(0) > 1 => format!("{entity}/{id}"),
            Some(id) => id,
            None => format!("{entity}/{i}"),
        };
        if seen.contains(&id) {
            id = format!("{id}#{i}");
        }
        seen.insert(id.clone());
        items.push((id, elem.clone(), Some(entity.clone())));
    }
    let qualified = uses.values().filter(|n| **n > 1).count();
    if qualified > 0 {
        debug!(stage = %ctx.stage(), field, qualified, "shared item ids qualified by entity");
    }
    items
}

// ── Aggregate ─────────────────────────────────────────────────────────────────

fn aggregate(
    ctx: &StageContext<'_>,
    source: &str,
    into: &str,
    group_by: &str,
) -> ConclaveResult<PartialUpdate> {
    let Some(Value::Object(values)) = ctx.state().field(source) else {
        return Err(ConclaveError::Validation {
            reason: format!("field '{source}' is missing or not a keyed object"),
        });
    };

    // group -> metric -> (sum, count)
    let mut sums: BTreeMap<String, BTreeMap<String, (f64, u32)>> = BTreeMap::new();
    let mut samples: BTreeMap<String, u32> = BTreeMap::new();
    for value in values.values() {
        let Some(obj) = value.as_object() else {
            continue;
        };
        let Some(group) = obj.get(group_by).and_then(Value::as_str) else {
            continue;
        };
        *samples.entry(group.to_string()).or_insert(0) += 1;
        let metrics = sums.entry(group.to_string()).or_default();
        for (name, v) in obj {
            if let Some(n) = v.as_f64().filter(|n| n.is_finite()) {
                let slot = metrics.entry(name.clone()).or_insert((0.0, 0));
                slot.0 += n;
                slot.1 += 1;
            }
        }
    }

    let aggregated: Map<String, Value> = sums
        .into_iter()
        .map(|(group, metrics)| {
            let mut out: Map<String, Value> = metrics
                .into_iter()
                .filter_map(|(name, (sum, count))| {
                    Number::from_f64(sum / f64::from(count)).map(|n| (name, Value::Number(n)))
                })
                .collect();
            out.insert("sample_count".to_string(), json!(samples.get(&group).copied().unwrap_or(0)));
            (group, Value::Object(out))
        })
        .collect();

    debug!(source, into, groups = aggregated.len(), "aggregated");
    Ok(PartialUpdate::from([(into.to_string(), Value::Object(aggregated))]))
}

// ── Verify ────────────────────────────────────────────────────────────────────

fn verify(
    ctx: &mut StageContext<'_>,
    definition: &WorkflowDefinition,
    field: &str,
    source: Stage,
) -> ConclaveResult<PartialUpdate> {
    let state = ctx.state();
    let entities = state.entities();
    let ranking = state.field(field);
    let report = RankingVerifier::new(&entities).verify(ranking);

    let ranking_present = ranking
        .and_then(parse_ranking)
        .is_some_and(|entries| !entries.is_empty());
    // An agent failure decides retryability; a ranking that exists but fails
    // its checks may come out differently on another attempt.
    let retryable = match state.stage_failure(source) {
        Some(error) => error.retryable,
        None => ranking_present && !report.passed,
    };
    let retries_used = state.counter(fields::RETRIES);
    let facts = VerifyFacts {
        ranking_present,
        checks_passed: report.passed,
        retryable,
        top_gap: ranking.and_then(top_gap),
        retries_used,
    };
    let outcome = evaluate_verification(&definition.policy.verify, &facts);
    info!(
        outcome = %outcome,
        retries_used,
        passed = report.passed,
        "ranking verified"
    );

    let summary = report.summary();
    let failures: Vec<Value> = report
        .failures
        .iter()
        .map(|f| json!({ "rule_id": f.rule_id, "message": f.message }))
        .collect();

    let stage = ctx.stage();
    ctx.bump(fields::VERIFY_EVALUATIONS);
    match outcome {
        VerifyOutcome::DegradedPass => ctx.warn(
            WarningKind::DegradedPass,
            format!("ranking accepted after {retries_used} retries: {summary}"),
        ),
        VerifyOutcome::Fail => ctx.record_error(ErrorRecord::validation(
            stage,
            format!("no usable ranking: {summary}"),
        )),
        _ => {}
    }

    Ok(PartialUpdate::from([
        (fields::VERIFY_OUTCOME.to_string(), json!(outcome)),
        (
            fields::VERIFICATION.to_string(),
            json!({
                "passed": report.passed,
                "failures": failures,
                "retries_used": retries_used,
                "top_gap": facts.top_gap,
            }),
        ),
    ]))
}

// ── DualRecommendation ────────────────────────────────────────────────────────

fn dual_recommendation(ctx: &StageContext<'_>) -> PartialUpdate {
    let mut entries = ctx
        .state()
        .field(fields::RANKING)
        .and_then(parse_ranking)
        .unwrap_or_default();
    entries.retain(|e| !e.eliminated);
    entries.sort_by_key(|e| e.rank);

    let option_a = entries.first();
    let option_b = entries.get(1);
    let gap = match (option_a, option_b) {
        (Some(a), Some(b)) => json!((a.score - b.score).abs()),
        _ => Value::Null,
    };
    PartialUpdate::from([(
        fields::DUAL_RECOMMENDATION.to_string(),
        json!({
            "option_a": option_a,
            "option_b": option_b,
            "score_gap": gap,
        }),
    )])
}
