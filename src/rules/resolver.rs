//! Field resolution: logical field → message value.

use crate::rules::types::{Field, Message};

/// Resolve `field` against `message`.
///
/// Unknown fields resolve to `""` so a misconfigured rule degrades to a
/// non-match. `ReceivedAt` also resolves to `""`: the date predicate reads
/// `message.received_at` directly.
pub fn resolve<'m>(message: &'m Message, field: &Field) -> &'m str {
    match field {
        Field::Sender => &message.sender,
        Field::Subject => &message.subject,
        Field::Body => &message.body,
        Field::ReceivedAt | Field::Unknown(_) => "",
    }
}
