use std::time::{Duration, Instant};

/// How long a wait is willing to block.
///
/// A zero timeout turns a wait into a non-blocking probe: it reports whether the primitive
/// is ready right now and never registers as a waiter.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
///
/// use latchkey::Timeout;
///
/// assert_eq!(Timeout::from(Duration::from_millis(5)), Timeout::After(Duration::from_millis(5)));
/// assert_eq!(Timeout::from(None), Timeout::Infinite);
///
/// // Negative values mean "wait forever".
/// assert_eq!(Timeout::from_millis(-1), Timeout::Infinite);
/// assert!(Timeout::from_millis(0).is_zero());
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
#[expect(
    clippy::exhaustive_enums,
    reason = "a wait is either bounded or not; there is no third option to add later"
)]
pub enum Timeout {
    /// Wait until the primitive becomes ready, however long that takes.
    #[default]
    Infinite,

    /// Wait at most this long.
    After(Duration),
}

impl Timeout {
    /// Do not wait at all.
    pub const ZERO: Self = Self::After(Duration::ZERO);

    /// Converts a signed millisecond count, where any negative value means [`Timeout::Infinite`].
    #[must_use]
    pub fn from_millis(millis: i64) -> Self {
        u64::try_from(millis).map_or(Self::Infinite, |millis| {
            Self::After(Duration::from_millis(millis))
        })
    }

    /// Whether this is a non-blocking probe.
    #[must_use]
    pub fn is_zero(self) -> bool {
        self == Self::ZERO
    }

    /// Whether this wait has no time limit.
    #[must_use]
    pub fn is_infinite(self) -> bool {
        self == Self::Infinite
    }

    /// The time limit, if there is one.
    #[must_use]
    pub fn duration(self) -> Option<Duration> {
        match self {
            Self::Infinite => None,
            Self::After(duration) => Some(duration),
        }
    }

    /// The instant at which a wait started at `start` gives up.
    ///
    /// A limit so far in the future that it cannot be represented is treated as no limit.
    pub(crate) fn deadline_from(self, start: Instant) -> Option<Instant> {
        self.duration()
            .and_then(|duration| start.checked_add(duration))
    }
}

impl From<Duration> for Timeout {
    fn from(value: Duration) -> Self {
        Self::After(value)
    }
}

impl From<Option<Duration>> for Timeout {
    fn from(value: Option<Duration>) -> Self {
        value.map_or(Self::Infinite, Self::After)
    }
}
