//! # FetchState
//! The lifecycle of a single request: idle, loading, then either data or an error.
//! Every hook that talks to the backend tracks one of these.

#[derive(Clone, Debug, PartialEq)]
pub enum FetchState<T, E> {
    /// Nothing has been requested yet.
    Idle,
    /// A request is in flight. `stale` is whatever the previous request produced, if anything.
    Loading { stale: Option<T> },
    Success(T),
    Failure(E),
}

impl<T, E> Default for FetchState<T, E> {
    fn default() -> Self {
        Self::Idle
    }
}

impl<T, E> FetchState<T, E> {
    pub fn loading() -> Self {
        Self::Loading { stale: None }
    }

    pub fn data(&self) -> Option<&T> {
        match self {
            Self::Success(data) => Some(data),
            Self::Loading { stale } => stale.as_ref(),
            Self::Idle | Self::Failure(_) => None,
        }
    }

    pub fn error(&self) -> Option<&E> {
        match self {
            Self::Failure(error) => Some(error),
            _ => None,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Loading { .. })
    }

    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Success(_) | Self::Failure(_))
    }

    /// Moves to `Loading`, carrying over the current data and clearing any error.
    pub fn begin(&mut self) {
        let stale = match std::mem::replace(self, Self::Idle) {
            Self::Success(data) => Some(data),
            Self::Loading { stale } => stale,
            Self::Idle | Self::Failure(_) => None,
        };
        *self = Self::Loading { stale };
    }

    pub fn resolve(&mut self, result: Result<T, E>) {
        *self = match result {
            Ok(data) => Self::Success(data),
            Err(error) => Self::Failure(error),
        };
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> FetchState<U, E> {
        match self {
            Self::Idle => FetchState::Idle,
            Self::Loading { stale } => FetchState::Loading { stale: stale.map(f) },
            Self::Success(data) => FetchState::Success(f(data)),
            Self::Failure(error) => FetchState::Failure(error),
        }
    }
}
