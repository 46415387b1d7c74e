//! The observable state of an async derivation.

/// The state of an async derivation, as seen by its subscribers.
///
/// Re-running a derivation does not throw away what the previous run
/// produced: the `previous` carriers keep the last successful data around so
/// consumers can keep rendering it while a new value is in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AsyncValue<T, E> {
    /// A run is in flight and has not produced a value yet.
    Loading {
        /// Data from the last successful run, if any.
        previous: Option<T>,
    },
    /// The latest run completed successfully.
    Data(T),
    /// The latest run failed.
    Error {
        /// The failure reported by the computation.
        error: E,
        /// Data from the last successful run, if any.
        previous: Option<T>,
    },
}

impl<T, E> AsyncValue<T, E> {
    /// Returns `true` while a run is in flight.
    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Loading { .. })
    }

    /// The data of the latest completed run, if it succeeded.
    pub fn data(&self) -> Option<&T> {
        match self {
            Self::Data(data) => Some(data),
            _ => None,
        }
    }

    /// The error of the latest completed run, if it failed.
    pub fn error(&self) -> Option<&E> {
        match self {
            Self::Error { error, .. } => Some(error),
            _ => None,
        }
    }

    /// The data carried over from a previous successful run, while loading
    /// or after a failure.
    pub fn previous_data(&self) -> Option<&T> {
        match self {
            Self::Loading { previous } | Self::Error { previous, .. } => previous.as_ref(),
            Self::Data(_) => None,
        }
    }

    /// The most recent successful data, whether current or carried over.
    pub fn latest_data(&self) -> Option<&T> {
        match self {
            Self::Data(data) => Some(data),
            Self::Loading { previous } | Self::Error { previous, .. } => previous.as_ref(),
        }
    }

    /// Consume the value, keeping the most recent successful data.
    pub fn into_latest_data(self) -> Option<T> {
        match self {
            Self::Data(data) => Some(data),
            Self::Loading { previous } | Self::Error { previous, .. } => previous,
        }
    }

    /// Map the data (current and carried-over) through `f`.
    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> AsyncValue<U, E> {
        match self {
            Self::Loading { previous } => AsyncValue::Loading {
                previous: previous.map(&mut f),
            },
            Self::Data(data) => AsyncValue::Data(f(data)),
            Self::Error { error, previous } => AsyncValue::Error {
                error,
                previous: previous.map(&mut f),
            },
        }
    }
}
