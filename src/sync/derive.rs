//! Values derived from a [`RoomSnapshot`] on every read. Nothing here is stored.

use std::cmp::Ordering;

use serde::Serialize;

use super::{SessionStatus, VoteValue, POKER_VALUES};
use crate::{cache::RoomSnapshot, db::RoomId};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParticipantView {
    pub participant_id: String,
    pub name: String,
    pub is_self: bool,
    pub is_admin: bool,
    pub has_voted: bool,
    /// Withheld until votes are revealed.
    pub vote: Option<VoteValue>,
    pub removable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoomView {
    pub room_id: RoomId,
    pub room_name: Option<String>,
    pub votes_revealed: bool,
    pub is_admin: bool,
    pub my_vote: VoteValue,
    pub average: Option<String>,
    pub cards: &'static [&'static str],
    pub participants: Vec<ParticipantView>,
    pub status: SessionStatus,
}

/// Mean of the numeric votes to one decimal place, `None` without any.
pub fn average<'a>(votes: impl IntoIterator<Item = &'a VoteValue>) -> Option<String> {
    let (sum, count) = votes
        .into_iter()
        .filter_map(VoteValue::numeric)
        .fold((0.0, 0usize), |(sum, count), value| (sum + value, count + 1));
    (count > 0).then(|| format!("{:.1}", sum / count as f64))
}

/// At least one numeric vote and every numeric vote has the same stored value.
pub fn is_unanimous<'a>(votes: impl IntoIterator<Item = &'a VoteValue>) -> bool {
    let mut raw = votes.into_iter().filter_map(|vote| match vote {
        VoteValue::Numeric(estimate) => Some(estimate.raw()),
        _ => None,
    });
    let Some(first) = raw.next() else {
        return false;
    };
    raw.all(|other| other == first)
}

fn group(vote: &VoteValue) -> u8 {
    match vote {
        VoteValue::Numeric(_) => 0,
        VoteValue::Unsure | VoteValue::NeedsBreak => 1,
        VoteValue::Unset => 2,
    }
}

/// Revealed order: numeric ascending, then other cards, then no vote. Stable,
/// so ties keep join order.
pub fn reveal_sort<T>(items: &mut [T], vote_of: impl Fn(&T) -> &VoteValue) {
    items.sort_by(|a, b| {
        let (a, b) = (vote_of(a), vote_of(b));
        group(a).cmp(&group(b)).then_with(|| match (a.numeric(), b.numeric()) {
            (Some(a), Some(b)) => a.total_cmp(&b),
            _ => Ordering::Equal,
        })
    });
}

/// Votes of roster members in join order. Rows left behind by a removed
/// participant are skipped.
pub fn roster_votes(snapshot: &RoomSnapshot) -> impl Iterator<Item = &VoteValue> {
    snapshot
        .participants
        .iter()
        .map(|participant| snapshot.vote_of(&participant.participant_id))
}

pub fn build_view(snapshot: &RoomSnapshot, token: Option<&str>, status: SessionStatus) -> Option<RoomView> {
    let room = snapshot.room.as_deref()?;
    let revealed = room.votes_revealed;
    let is_admin = token.is_some_and(|token| token == room.admin_id);

    let mut roster: Vec<_> = snapshot
        .participants
        .iter()
        .map(|participant| (participant, snapshot.vote_of(&participant.participant_id)))
        .collect();
    if revealed {
        reveal_sort(&mut roster, |entry| entry.1);
    }
    let average = if revealed { average(roster.iter().map(|entry| entry.1)) } else { None };

    let participants = roster
        .into_iter()
        .map(|(participant, vote)| {
            let is_self = token == Some(participant.participant_id.as_str());
            ParticipantView {
                participant_id: participant.participant_id.clone(),
                name: participant.name.clone(),
                is_self,
                is_admin: participant.participant_id == room.admin_id,
                has_voted: vote.is_cast(),
                vote: revealed.then(|| vote.clone()),
                removable: is_admin && !is_self,
            }
        })
        .collect();

    Some(RoomView {
        room_id: room.id,
        room_name: room.room_name.clone(),
        votes_revealed: revealed,
        is_admin,
        my_vote: token.map(|token| snapshot.vote_of(token).clone()).unwrap_or_default(),
        average,
        cards: &POKER_VALUES,
        participants,
        status,
    })
}
