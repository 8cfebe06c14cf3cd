/// Two-phase value for optimistic edits: the UI sees `proposed` right away, and the prior
/// value is kept until the remote write either commits or fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Optimistic<T> {
    Committed(T),
    Pending { prior: T, proposed: T },
}

impl<T: Clone + PartialEq> Optimistic<T> {
    pub const fn committed(value: T) -> Self {
        Self::Committed(value)
    }

    pub const fn current(&self) -> &T {
        match self {
            Self::Committed(v) | Self::Pending { proposed: v, .. } => v,
        }
    }

    pub const fn is_pending(&self) -> bool {
        matches!(self, Self::Pending { .. })
    }

    /// Stage `value`. A second proposal while pending keeps the original prior, so a rollback
    /// always returns to the last committed value.
    pub fn propose(&mut self, value: T) {
        let prior = match self {
            Self::Committed(v) | Self::Pending { prior: v, .. } => v.clone(),
        };
        *self = Self::Pending {
            prior,
            proposed: value,
        };
    }

    /// Accept the server's value, but only if `expected` is still the proposal in flight.
    /// Returns false when a newer proposal superseded it.
    pub fn commit(&mut self, expected: &T, server: T) -> bool {
        match self {
            Self::Pending { proposed, .. } if proposed == expected => {
                *self = Self::Committed(server);
                true
            }
            Self::Pending { .. } | Self::Committed(_) => false,
        }
    }

    /// Restore the prior value if `expected` is still the proposal in flight.
    pub fn rollback(&mut self, expected: &T) -> bool {
        match self {
            Self::Pending { prior, proposed } if proposed == expected => {
                *self = Self::Committed(prior.clone());
                true
            }
            Self::Pending { .. } | Self::Committed(_) => false,
        }
    }
}
