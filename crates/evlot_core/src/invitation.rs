//! Winners answering their invitation.

use crate::dispatcher::{Notice, NotificationDispatcher, PushTarget};
use crate::error::{LotteryError, LotteryResult};
use evlot_model::{Entrant, EntrantId, Event, InvitationResponse, ModelError, NotificationKind};
use evlot_sync::SyncStore;
use tracing::{info, warn};

/// Organizer notice for an entrant's answer.
pub fn organizer_notice(
    response: InvitationResponse,
    entrant_name: &str,
    event_title: &str,
) -> String {
    let name = if entrant_name.trim().is_empty() {
        "An entrant"
    } else {
        entrant_name
    };
    match response {
        InvitationResponse::Accepted => {
            format!("{name} has accepted their invitation for {event_title}.")
        }
        InvitationResponse::Declined => format!(
            "{name} has declined their invitation for {event_title}. You may want to run \
             another lottery draw to fill the spot, but it's your choice."
        ),
    }
}

fn confirmation(
    response: InvitationResponse,
    event_title: &str,
) -> (NotificationKind, String, String) {
    match response {
        InvitationResponse::Accepted => (
            NotificationKind::InvitationAccepted,
            "Invitation Accepted".to_string(),
            format!("You have accepted your invitation for {event_title}."),
        ),
        InvitationResponse::Declined => (
            NotificationKind::InvitationDeclined,
            "Invitation Declined".to_string(),
            format!("You have declined your invitation for {event_title}."),
        ),
    }
}

/// Records the session user's answer to a winning invitation.
///
/// The entrant must have been notified of a `Selected` outcome and may
/// answer once. The entrant gets a confirmation and the organizer a
/// notice; failed pushes are logged and do not undo the answer.
pub async fn respond(
    store: &SyncStore,
    dispatcher: &NotificationDispatcher,
    entrant_id: EntrantId,
    response: InvitationResponse,
) -> LotteryResult<Entrant> {
    let mut entrant = store
        .entrant(entrant_id)?
        .ok_or(LotteryError::EntrantNotFound(entrant_id))?;
    if entrant.user_id != store.user_id()? {
        return Err(LotteryError::InvalidResponse {
            entrant_id,
            reason: "only the entrant can answer the invitation".into(),
        });
    }
    let event: Event = store
        .event(entrant.event_id)?
        .ok_or(LotteryError::EventNotFound(entrant.event_id))?;

    entrant
        .respond(response, store.now())
        .map_err(|e| match e {
            ModelError::Validation(reason) => LotteryError::InvalidResponse { entrant_id, reason },
            other => other.into(),
        })?;
    store.upsert(entrant.clone())?;
    info!(entrant = %entrant_id, event = %event.id, ?response, "invitation answered");

    let (kind, title, message) = confirmation(response, &event.title);
    let to_entrant = Notice {
        recipient: entrant.user_id.clone(),
        target: PushTarget::for_entrant(&entrant),
        entrant_id: Some(entrant_id),
        event_id: event.id,
        kind,
        title,
        message,
    };
    if entrant.notifications_enabled {
        if let Err(e) = dispatcher.notify_user(to_entrant).await {
            warn!(entrant = %entrant_id, error = %e, "confirmation not delivered");
        }
    }

    let organizer_kind = match response {
        InvitationResponse::Accepted => NotificationKind::EntrantAccepted,
        InvitationResponse::Declined => NotificationKind::EntrantDeclined,
    };
    let to_organizer = Notice {
        recipient: event.organizer.clone(),
        target: PushTarget::user_topic(&event.organizer),
        entrant_id: Some(entrant_id),
        event_id: event.id,
        kind: organizer_kind,
        title: event.title.clone(),
        message: organizer_notice(response, &entrant.display_name, &event.title),
    };
    if let Err(e) = dispatcher.notify_user(to_organizer).await {
        warn!(organizer = %event.organizer, error = %e, "organizer notice not delivered");
    }

    Ok(entrant)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decline_notice_suggests_redraw() {
        let text = organizer_notice(InvitationResponse::Declined, "Ada", "Pottery");
        assert_eq!(
            text,
            "Ada has declined their invitation for Pottery. You may want to run another \
             lottery draw to fill the spot, but it's your choice."
        );
    }

    #[test]
    fn nameless_entrant() {
        assert_eq!(
            organizer_notice(InvitationResponse::Accepted, "  ", "Pottery"),
            "An entrant has accepted their invitation for Pottery."
        );
    }
}
