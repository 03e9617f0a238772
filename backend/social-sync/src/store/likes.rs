use serde::{Deserialize, Serialize};

/// Like aggregate for one post or comment as displayed to the viewer
///
/// Besides the displayed `count`/`liked` pair it tracks the last membership
/// the server confirmed and how many toggles are still in flight. When the
/// last in-flight toggle settles, the displayed membership is brought back
/// to the confirmed one by the exact inverse step (±1), so the rollback
/// basis is always the displayed state, never a recount.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LikeState {
    pub count: u64,
    pub liked: bool,
    confirmed: bool,
    in_flight: u32,
}

impl LikeState {
    pub fn new(count: u64, liked: bool) -> Self {
        // The viewer's own like is part of the count.
        let count = if liked { count.max(1) } else { count };
        Self {
            count,
            liked,
            confirmed: liked,
            in_flight: 0,
        }
    }

    /// Commutative counter adjustment, clamped at zero
    pub fn adjust(&mut self, delta: i64, liked: Option<bool>) {
        self.count = if delta.is_negative() {
            self.count.saturating_sub(delta.unsigned_abs())
        } else {
            self.count.saturating_add(delta as u64)
        };
        if let Some(liked) = liked {
            self.liked = liked;
        }
    }

    /// Optimistic toggle; returns the membership the toggle asks for
    pub fn begin_toggle(&mut self) -> bool {
        let target = !self.liked;
        self.adjust(if target { 1 } else { -1 }, Some(target));
        self.in_flight += 1;
        target
    }

    /// Settle one toggle: `Some(membership)` when the server accepted the
    /// write, `None` when it failed.
    pub fn settle(&mut self, outcome: Option<bool>) {
        self.in_flight = self.in_flight.saturating_sub(1);
        if let Some(membership) = outcome {
            self.confirmed = membership;
        }
        if self.in_flight == 0 && self.liked != self.confirmed {
            let target = self.confirmed;
            self.adjust(if target { 1 } else { -1 }, Some(target));
        }
    }

    /// Another user's like arrived (or left) through a push or reload
    pub fn observe_other(&mut self, delta: i64) {
        self.adjust(delta, None);
    }

    pub fn is_settling(&self) -> bool {
        self.in_flight > 0
    }
}
