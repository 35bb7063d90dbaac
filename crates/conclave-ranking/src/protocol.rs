//! The two-phase competitive ranking protocol.
//!
//! Phase 1 runs once: every candidate is researched and presented by its
//! expert, then every peer reviewer scores every presentation. If the
//! composites are already well separated the ranking is final.
//!
//! Otherwise Phase 2 (the hot seat) refines the bottom of the ranking round
//! by round. The lowest-ranked candidates are challenged by every peer,
//! defend once, and are re-scored. A defense that does not improve the
//! candidate costs a strike; at the strike limit the candidate is
//! eliminated and its rank frozen. Rounds stop when the ranking is stable,
//! fewer than two candidates remain, or the round limit is reached.
//!
//! A scoring round that leaves a candidate in scope with no peer score at
//! all ends the attempt without a ranking: nothing is ranked, struck or
//! eliminated on missing evidence. The stage then carries the peers' last
//! failure, and Verify decides whether to retry.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use conclave_contracts::{
    capability::Capability,
    error::{AgentError, ConclaveError, ConclaveResult},
    ranking::{RankingOutcome, RankingPhase},
    state::{ErrorRecord, PartialUpdate, WarningKind},
    view::StateView,
};
use conclave_core::Agent;
use conclave_engine::{fields::RANKING, FanOutResult, FanOutTask, StageContext, StageProcedure};
use conclave_policy::{defense_improved, hot_seat_size, is_satisfactory};

use crate::board::Board;

/// Fields the protocol writes.
pub mod fields {
    pub const RESEARCH: &str = "research";
    pub const PRESENTATIONS: &str = "presentations";
    pub const PEER_SCORES: &str = "peer_scores";
    pub const RANKING_OUTCOME: &str = "ranking_outcome";
}

/// Keys agents read from their view and write in their output.
pub mod keys {
    /// Research output key, and the overlay holding one entity's research.
    pub const RESEARCH: &str = "research";
    pub const CURRENT_RESEARCH: &str = "current_research";
    pub const PRESENTATION: &str = "presentation";
    /// Overlay: `{entity: presentation}` for every candidate.
    pub const PRESENTATIONS: &str = "presentations";
    /// Peer output: `{entity: number}`.
    pub const SCORES: &str = "scores";
    pub const CHALLENGER: &str = "challenger";
    pub const CHALLENGE: &str = "challenge";
    pub const CHALLENGES: &str = "challenges";
    pub const DEFENSE: &str = "defense";
    /// Overlay: `{entity: defense}` for the current hot seat.
    pub const DEFENSES: &str = "defenses";
    pub const HOT_SEAT: &str = "hot_seat";
    /// Overlay: 0 for Phase 1, then the hot-seat round number.
    pub const ROUND: &str = "round";
}

/// Stage procedure running the competitive ranking protocol. All tuning
/// comes from the policy's `ranking` section.
#[derive(Debug, Default, Clone, Copy)]
pub struct CompetitiveRanking;

impl CompetitiveRanking {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StageProcedure for CompetitiveRanking {
    fn name(&self) -> &str {
        "competitive-ranking"
    }

    fn outputs(&self) -> Vec<String> {
        [
            fields::RESEARCH,
            fields::PRESENTATIONS,
            fields::PEER_SCORES,
            RANKING,
            fields::RANKING_OUTCOME,
        ]
        .iter()
        .map(|f| f.to_string())
        .collect()
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![
            Capability::Research,
            Capability::ExpertPresentation,
            Capability::PeerReview,
            Capability::Challenge,
            Capability::Defense,
        ]
    }

    async fn execute(&self, ctx: &mut StageContext<'_>) -> ConclaveResult<PartialUpdate> {
        let entities = ctx.state().entities();
        let peers = ctx.require_agents(Capability::PeerReview)?;
        let researcher = first_agent(ctx, Capability::Research)?;
        let presenter = first_agent(ctx, Capability::ExpertPresentation)?;

        // ── Phase 1 ──────────────────────────────────────────────────────────
        let research = compile_research(ctx, &researcher, &entities).await?;
        let presentations = present(ctx, &presenter, &entities, &research).await?;

        let mut board = Board::new(&entities, ctx.policy().ranking.clone());
        let ranked = rank(ctx, &peers, &mut board, &presentations).await;

        let mut update = PartialUpdate::from([
            (fields::RESEARCH.to_string(), Value::Object(research)),
            (fields::PRESENTATIONS.to_string(), Value::Object(presentations)),
            (fields::PEER_SCORES.to_string(), board.score_summary()),
        ]);
        match ranked {
            Ok(outcome) => {
                update.insert(RANKING.to_string(), json!(board.ranking()));
                update.insert(fields::RANKING_OUTCOME.to_string(), json!(outcome));
            }
            Err(Halt::Failed(err)) => return Err(err),
            Err(Halt::Unscored { round, entities, cause }) => {
                // Nulls clear any ranking an earlier attempt left behind. The
                // scoring fan-out has already set this stage's failure, so
                // Verify sees no ranking and decides on a retry.
                update.insert(RANKING.to_string(), Value::Null);
                update.insert(fields::RANKING_OUTCOME.to_string(), Value::Null);
                let message = format!(
                    "round {round}: no peer scores for {}; ranking withheld",
                    entities.join(", ")
                );
                warn!(round, unscored = ?entities, cause = ?cause, "ranking withheld");
                let record = ErrorRecord::validation(ctx.stage(), message);
                ctx.record_error(ErrorRecord {
                    retryable: cause.as_ref().is_some_and(|e| e.retryable),
                    ..record
                });
            }
        }
        Ok(update)
    }
}

/// Why a ranking attempt stopped without a ranking.
enum Halt {
    /// A scoring round left these candidates without a single peer score.
    /// `cause` is the last peer failure of that round, if any peer failed.
    Unscored {
        round: u32,
        entities: Vec<String>,
        cause: Option<AgentError>,
    },
    Failed(ConclaveError),
}

impl From<ConclaveError> for Halt {
    fn from(err: ConclaveError) -> Self {
        Halt::Failed(err)
    }
}

/// Score every presentation, then refine in the hot seat when the initial
/// composites are too close.
async fn rank(
    ctx: &mut StageContext<'_>,
    peers: &[Agent],
    board: &mut Board,
    presentations: &Map<String, Value>,
) -> Result<RankingOutcome, Halt> {
    let view = ctx
        .view()
        .with(keys::PRESENTATIONS, Value::Object(presentations.clone()))
        .with(keys::ROUND, json!(0));
    score(ctx, peers, board, 0, view, None).await?;
    board.rerank();

    let threshold = board.settings().separation_threshold;
    let separated = is_satisfactory(&board.scores_desc(), threshold);
    info!(
        candidates = board.active_count(),
        peers = peers.len(),
        order = ?board.order(),
        separated,
        "initial evaluation complete"
    );

    if separated {
        return Ok(RankingOutcome {
            phase: RankingPhase::Initial,
            rounds: Vec::new(),
            eliminated: Vec::new(),
            converged: true,
        });
    }
    hot_seat(ctx, peers, board, presentations).await
}

fn first_agent(ctx: &StageContext<'_>, capability: Capability) -> ConclaveResult<Agent> {
    ctx.resolve(capability)
        .into_iter()
        .next()
        .ok_or(ConclaveError::NoAgentForCapability { capability })
}

/// `{key: output[field]}` over the results, null for failed items.
fn collect_keyed(results: &[FanOutResult], field: &str) -> Map<String, Value> {
    results
        .iter()
        .map(|r| {
            let value = r
                .output()
                .and_then(|o| o.get(field))
                .cloned()
                .unwrap_or(Value::Null);
            (r.key.clone(), value)
        })
        .collect()
}

// ── Phase 1 ───────────────────────────────────────────────────────────────────

async fn compile_research(
    ctx: &mut StageContext<'_>,
    researcher: &Agent,
    entities: &[String],
) -> ConclaveResult<Map<String, Value>> {
    let tasks = entities
        .iter()
        .map(|e| FanOutTask::new(e.as_str(), researcher.clone(), ctx.entity_view(e)))
        .collect();
    let results = ctx.fan_out(tasks).await?;
    Ok(collect_keyed(&results, keys::RESEARCH))
}

async fn present(
    ctx: &mut StageContext<'_>,
    presenter: &Agent,
    entities: &[String],
    research: &Map<String, Value>,
) -> ConclaveResult<Map<String, Value>> {
    let tasks = entities
        .iter()
        .map(|e| {
            let bundle = research.get(e).cloned().unwrap_or(Value::Null);
            let view = ctx.entity_view(e).with(keys::CURRENT_RESEARCH, bundle);
            FanOutTask::new(e.as_str(), presenter.clone(), view)
        })
        .collect();
    let results = ctx.fan_out(tasks).await?;
    Ok(collect_keyed(&results, keys::PRESENTATION))
}

/// Invoke every peer once against `view` and record its score sheet.
///
/// Every candidate in scope must receive at least one score this round;
/// otherwise the round halts the attempt before anything is ranked or judged.
async fn score(
    ctx: &mut StageContext<'_>,
    peers: &[Agent],
    board: &mut Board,
    round: u32,
    view: StateView,
    only: Option<&[String]>,
) -> Result<(), Halt> {
    let tasks = peers
        .iter()
        .map(|p| FanOutTask::new(p.id().as_str(), p.clone(), view.clone()))
        .collect();
    let results = ctx.fan_out(tasks).await?;
    for r in &results {
        let Some(sheet) = r.output().and_then(|o| o.get(keys::SCORES)).and_then(Value::as_object) else {
            continue;
        };
        let recorded = board.record(&r.agent_id, round, sheet, only);
        debug!(peer = %r.agent_id, round, recorded, "peer scores recorded");
    }

    let unscored = board.unscored(round, only);
    if unscored.is_empty() {
        return Ok(());
    }
    Err(Halt::Unscored {
        round,
        entities: unscored,
        cause: results.iter().rev().find_map(|r| r.result.as_ref().err()).cloned(),
    })
}

// ── Phase 2 ───────────────────────────────────────────────────────────────────

async fn hot_seat(
    ctx: &mut StageContext<'_>,
    peers: &[Agent],
    board: &mut Board,
    presentations: &Map<String, Value>,
) -> Result<RankingOutcome, Halt> {
    let challenger = first_agent(ctx, Capability::Challenge)?;
    let defender = first_agent(ctx, Capability::Defense)?;
    let max_rounds = board.settings().max_rounds;

    let mut previous = board.snapshot(0, Vec::new());
    let mut rounds = Vec::new();
    let mut converged = false;

    for round in 1..=max_rounds {
        if board.active_count() < 2 {
            converged = true;
            break;
        }
        let hot = bottom(board);
        let before: BTreeMap<String, (f64, u32)> = hot
            .iter()
            .filter_map(|e| board.get(e).map(|c| (e.clone(), (c.composite, c.rank))))
            .collect();

        let challenges = challenge(ctx, &challenger, peers, &hot, presentations).await?;
        let defenses = defend(ctx, &defender, &hot, &challenges, presentations).await?;

        let view = ctx
            .view()
            .with(keys::PRESENTATIONS, Value::Object(presentations.clone()))
            .with(keys::DEFENSES, Value::Object(defenses))
            .with(keys::HOT_SEAT, json!(hot))
            .with(keys::ROUND, json!(round));
        score(ctx, peers, board, round, view, Some(hot.as_slice())).await?;
        board.rerank();

        let margin = board.settings().improvement_margin;
        let mut out = Vec::new();
        for entity in &hot {
            let Some(&(before_score, before_rank)) = before.get(entity) else {
                continue;
            };
            let Some(after) = board.get(entity) else {
                continue;
            };
            let improved = defense_improved(before_score, after.composite, before_rank, after.rank, margin);
            if board.judge(entity, improved) {
                out.push(entity.clone());
            }
        }
        board.eliminate(&out);

        let snapshot = board.snapshot(round, hot.clone());
        let stable = snapshot.is_stable_with(&previous);
        info!(
            round,
            hot_seat = ?hot,
            eliminated = ?out,
            order = ?snapshot.order,
            stable,
            "hot-seat round complete"
        );
        rounds.push(snapshot.clone());
        previous = snapshot;

        if stable || board.active_count() < 2 {
            converged = true;
            break;
        }
    }

    if !converged {
        ctx.warn(
            WarningKind::ConvergenceWarning,
            format!("ranking did not stabilize within {max_rounds} hot-seat rounds"),
        );
    }

    Ok(RankingOutcome {
        phase: RankingPhase::HotSeat,
        rounds,
        eliminated: board.eliminated(),
        converged,
    })
}

/// The lowest-ranked active candidates for this round.
fn bottom(board: &Board) -> Vec<String> {
    let order = board.order();
    let size = hot_seat_size(board.settings().hot_seat_size, order.len());
    order[order.len() - size..].to_vec()
}

/// One challenge per (hot-seat candidate, peer). Returns the successful
/// challenges grouped by candidate.
async fn challenge(
    ctx: &mut StageContext<'_>,
    challenger: &Agent,
    peers: &[Agent],
    hot: &[String],
    presentations: &Map<String, Value>,
) -> ConclaveResult<BTreeMap<String, Vec<Value>>> {
    let mut tasks = Vec::with_capacity(hot.len() * peers.len());
    for entity in hot {
        let presentation = presentations.get(entity).cloned().unwrap_or(Value::Null);
        for peer in peers {
            let view = ctx
                .entity_view(entity)
                .with(keys::PRESENTATION, presentation.clone())
                .with(keys::CHALLENGER, Value::String(peer.id().to_string()));
            tasks.push(FanOutTask::new(format!("{entity}::{}", peer.id()), challenger.clone(), view));
        }
    }

    let mut grouped: BTreeMap<String, Vec<Value>> = hot.iter().map(|e| (e.clone(), Vec::new())).collect();
    for r in ctx.fan_out(tasks).await? {
        let Some(text) = r.output().and_then(|o| o.get(keys::CHALLENGE)) else {
            continue;
        };
        if let Some((entity, _)) = r.key.split_once("::") {
            if let Some(list) = grouped.get_mut(entity) {
                list.push(text.clone());
            }
        }
    }
    Ok(grouped)
}

/// One defense per hot-seat candidate against all of its challenges.
async fn defend(
    ctx: &mut StageContext<'_>,
    defender: &Agent,
    hot: &[String],
    challenges: &BTreeMap<String, Vec<Value>>,
    presentations: &Map<String, Value>,
) -> ConclaveResult<Map<String, Value>> {
    let tasks = hot
        .iter()
        .map(|entity| {
            let view = ctx
                .entity_view(entity)
                .with(
                    keys::PRESENTATION,
                    presentations.get(entity).cloned().unwrap_or(Value::Null),
                )
                .with(
                    keys::CHALLENGES,
                    Value::Array(challenges.get(entity).cloned().unwrap_or_default()),
                );
            FanOutTask::new(entity.as_str(), defender.clone(), view)
        })
        .collect();
    let results = ctx.fan_out(tasks).await?;
    Ok(collect_keyed(&results, keys::DEFENSE))
}
