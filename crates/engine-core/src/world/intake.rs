use contracts::{Action, ActionSubmission, Phase, SimError};

use super::World;

/// Run the ordered intake checks for one submission; the first failing check
/// decides the rejection reason. Consults the current (frozen) world state
/// only — callers must not let a merge run concurrently.
///
/// Order: phase, actor existence, secret, supertick, context hash,
/// journal-row absence, intent keyword, scope, intent parameters. Namespace
/// format and URL/body agreement are checked by the HTTP layer before the
/// engine is even resolved.
pub fn validate_submission(
    world: &World,
    expected_hash: &str,
    actor_id: &str,
    provided_secret: &str,
    submission: &ActionSubmission,
    already_submitted: bool,
) -> Result<Action, SimError> {
    if world.phase != Phase::Collect {
        return Err(SimError::PhaseMismatch { phase: world.phase });
    }

    let actor = world
        .actors
        .get(actor_id)
        .filter(|actor| !actor.is_eliminated())
        .ok_or_else(|| SimError::UnknownActor(actor_id.to_string()))?;

    if actor.secret != provided_secret {
        return Err(SimError::AuthFailed(actor_id.to_string()));
    }

    if submission.supertick_id != world.supertick_id {
        return Err(SimError::SupertickMismatch {
            expected: world.supertick_id,
            got: submission.supertick_id,
        });
    }

    if submission.context_hash != expected_hash {
        return Err(SimError::ContextHashMismatch {
            expected: expected_hash.to_string(),
            got: submission.context_hash.clone(),
        });
    }

    if already_submitted {
        return Err(SimError::AlreadySubmitted {
            actor_id: actor_id.to_string(),
            supertick_id: world.supertick_id,
        });
    }

    let intent = Action::intent_of(&submission.action).map_err(SimError::MalformedAction)?;

    if !actor.scopes.contains(&intent) {
        return Err(SimError::ScopeDenied {
            actor_id: actor_id.to_string(),
            intent,
        });
    }

    let action = Action::parse_params(intent, &submission.action)
        .map_err(SimError::MalformedAction)?;

    if let Action::Paint {
        target: Some(pos), ..
    } = &action
    {
        if !world.in_bounds(i64::from(pos.x), i64::from(pos.y)) {
            return Err(SimError::MalformedAction(format!(
                "PAINT target ({}, {}) is out of bounds for {}x{} world",
                pos.x,
                pos.y,
                world.width(),
                world.height()
            )));
        }
    }

    Ok(action)
}
