use std::collections::BTreeMap;

use contracts::{
    ActorRecord, AuditRecord, ChatMessage, Intent, Phase, RecalledMemory, Visibility,
};

use super::snapshot::Snapshot;

const BANNER: &str =
    "============================================================";

/// Everything the HUD renders for one agent. The snapshot sections come from
/// the same frozen `Snapshot` the context hash is computed over; the
/// per-agent sections (last result, chat, memories) are read-only store
/// queries bounded by the request.
#[derive(Debug)]
pub struct HudContext<'a> {
    pub snapshot: &'a Snapshot,
    pub phase: Phase,
    pub actor: &'a ActorRecord,
    /// Audit rows for the previous tick, every actor, bounded upstream.
    pub history: &'a [AuditRecord],
    pub chat: &'a [ChatMessage],
    pub memories: &'a [RecalledMemory],
    pub visibility: Visibility,
}

pub fn render_hud(ctx: &HudContext<'_>) -> String {
    let mut hud: Vec<String> = Vec::new();
    let snapshot = ctx.snapshot;
    let actor = ctx.actor;

    hud.push(BANNER.to_string());
    hud.push("MONUMENT - AGENT CONTEXT".to_string());
    hud.push(BANNER.to_string());
    hud.push(String::new());
    hud.push(format!("NAMESPACE: {}", snapshot.namespace));
    hud.push(format!("SUPERTICK: {}", snapshot.supertick_id));
    hud.push(format!("AGENT: {}", actor.id));
    hud.push(format!("POSITION: ({}, {})", actor.x, actor.y));
    hud.push(format!("FACING: {}", actor.facing));
    hud.push(format!("PHASE: {}", ctx.phase));
    hud.push(format!("POINTS: {}", actor.points));
    hud.push(String::new());

    if !actor.custom_instructions.is_empty() {
        hud.push("YOUR IDENTITY & OBJECTIVES:".to_string());
        for line in actor.custom_instructions.lines() {
            hud.push(format!("  {line}"));
        }
        hud.push(String::new());
    }

    let goal = if snapshot.goal.is_empty() {
        "None"
    } else {
        snapshot.goal.as_str()
    };
    hud.push(format!("WORLD GOAL: {goal}"));
    hud.push(String::new());

    render_last_tick_result(&mut hud, ctx);
    render_last_adjudication(&mut hud, ctx);
    render_tiles(&mut hud, ctx);
    render_actors(&mut hud, ctx);
    render_chat(&mut hud, ctx);
    render_memories(&mut hud, ctx);
    render_available_actions(&mut hud, actor);

    hud.push(String::new());
    hud.push(BANNER.to_string());
    hud.join("\n")
}

fn render_last_tick_result(hud: &mut Vec<String>, ctx: &HudContext<'_>) {
    if ctx.snapshot.supertick_id == 0 {
        return;
    }
    let prev_tick = ctx.snapshot.supertick_id - 1;
    hud.push("LAST_TICK_RESULT:".to_string());

    let own = ctx
        .history
        .iter()
        .find(|record| record.actor_id == ctx.actor.id && record.supertick_id == prev_tick);
    match own {
        Some(record) => {
            hud.push(format!(
                "  {} -> {}: {} (points {:+})",
                record.action_type,
                record.result.outcome,
                record.result.reason,
                record.result.points_delta,
            ));
        }
        None => hud.push("  No action recorded".to_string()),
    }

    let others = ctx
        .history
        .iter()
        .filter(|record| record.actor_id != ctx.actor.id && record.supertick_id == prev_tick)
        .collect::<Vec<_>>();
    if !others.is_empty() {
        hud.push(format!("PREVIOUS SUPERTICK ({prev_tick}) RESULTS:"));
        for record in others {
            hud.push(format!(
                "  {}: {} -> {}: {}",
                record.actor_id, record.action_type, record.result.outcome, record.result.reason,
            ));
        }
    }
    hud.push(String::new());
}

fn render_last_adjudication(hud: &mut Vec<String>, ctx: &HudContext<'_>) {
    let Some(round) = &ctx.snapshot.last_adjudication else {
        return;
    };
    hud.push("LAST_ADJUDICATION:".to_string());
    hud.push(format!("  Scored at supertick {}", round.supertick_id));
    hud.push(format!("  Selected tiles: {}", round.selected_tiles.len()));
    let own = round
        .contributions_by_actor
        .get(&ctx.actor.id)
        .copied()
        .unwrap_or(0);
    hud.push(format!("  Your contribution: {own:+}"));
    if !round.rationale.is_empty() {
        hud.push(format!("  Rationale: {}", round.rationale));
    }
    if !round.feedback.is_empty() {
        hud.push("  Feedback:".to_string());
        for line in round.feedback.lines() {
            hud.push(format!("    {line}"));
        }
    }
    hud.push(String::new());
}

fn render_tiles(hud: &mut Vec<String>, ctx: &HudContext<'_>) {
    let snapshot = ctx.snapshot;
    let visible = snapshot
        .tiles
        .iter()
        .filter(|tile| {
            ctx.visibility
                .can_see(ctx.actor.x, ctx.actor.y, tile.x, tile.y)
        })
        .collect::<Vec<_>>();

    hud.push("WORLD TILES:".to_string());
    hud.push(format!(
        "  World size: {}x{}",
        snapshot.width, snapshot.height
    ));
    if let Visibility::Radius(radius) = ctx.visibility {
        hud.push(format!("  Visibility radius: {radius}"));
    }
    hud.push(format!("  Painted tiles visible: {}", visible.len()));

    // Group by color; rare colors list positions, common ones just a count.
    let mut by_color: BTreeMap<&str, Vec<(u32, u32)>> = BTreeMap::new();
    for tile in &visible {
        by_color
            .entry(tile.color.as_str())
            .or_default()
            .push((tile.x, tile.y));
    }
    if !by_color.is_empty() {
        hud.push("  Colors present:".to_string());
        for (color, positions) in by_color {
            if positions.len() <= 3 {
                let listed = positions
                    .iter()
                    .map(|(x, y)| format!("({x},{y})"))
                    .collect::<Vec<_>>()
                    .join(", ");
                hud.push(format!("    {color}: {listed}"));
            } else {
                hud.push(format!("    {color}: {} tiles", positions.len()));
            }
        }
    }
    hud.push(String::new());
}

fn render_actors(hud: &mut Vec<String>, ctx: &HudContext<'_>) {
    hud.push("ACTORS:".to_string());
    let mut any = false;
    for other in &ctx.snapshot.actors {
        if !ctx
            .visibility
            .can_see(ctx.actor.x, ctx.actor.y, other.x, other.y)
        {
            continue;
        }
        any = true;
        if other.id == ctx.actor.id {
            hud.push(format!(
                "  {} (YOU) at ({}, {}) facing {}",
                other.id, other.x, other.y, other.facing
            ));
        } else {
            let distance = (i64::from(other.x) - i64::from(ctx.actor.x)).abs()
                + (i64::from(other.y) - i64::from(ctx.actor.y)).abs();
            hud.push(format!(
                "  {} at ({}, {}) facing {} [distance: {distance}]",
                other.id, other.x, other.y, other.facing
            ));
        }
    }
    if !any {
        hud.push("  No visible actors".to_string());
    }
    hud.push(String::new());
}

fn render_chat(hud: &mut Vec<String>, ctx: &HudContext<'_>) {
    hud.push("CHAT (recent):".to_string());
    if ctx.chat.is_empty() {
        hud.push("  No messages".to_string());
    } else {
        for message in ctx.chat {
            let tick_label = if message.supertick_id == ctx.snapshot.supertick_id {
                "current".to_string()
            } else {
                format!("tick {}", message.supertick_id)
            };
            hud.push(format!(
                "  [{tick_label}] {}: {}",
                message.from_id, message.message
            ));
        }
    }
    hud.push(String::new());
}

fn render_memories(hud: &mut Vec<String>, ctx: &HudContext<'_>) {
    if ctx.memories.is_empty() {
        return;
    }
    hud.push("RECALLED MEMORIES:".to_string());
    for memory in ctx.memories {
        hud.push(format!("  [tick {}] {}", memory.tick, memory.text));
    }
    hud.push(String::new());
}

fn render_available_actions(hud: &mut Vec<String>, actor: &ActorRecord) {
    hud.push("AVAILABLE ACTIONS:".to_string());
    let descriptions = [
        (
            Intent::Move,
            "  MOVE <direction>     - Move in direction (N, S, E, W)",
        ),
        (
            Intent::Paint,
            "  PAINT <color> [x y]  - Paint a tile (color: #RRGGBB; default: your tile)",
        ),
        (Intent::Speak, "  SPEAK <message>      - Send a chat message"),
        (Intent::Wait, "  WAIT                 - Do nothing this tick"),
        (
            Intent::Skip,
            "  SKIP                 - Explicitly skip this tick",
        ),
    ];
    let mut any = false;
    for (intent, description) in descriptions {
        if actor.scopes.contains(&intent) {
            hud.push(description.to_string());
            any = true;
        }
    }
    if !any {
        hud.push("  (No actions available)".to_string());
    }
}
