use std::fmt;

/// Closed taxonomy of outcomes for every blob operation.
///
/// Every back-end maps its own native error codes onto this set; the mapping
/// rules live with each back-end (see `blob-client`), not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Cause {
    Ok,
    Already,
    Forbidden,
    NotFound,
    NetworkError,
    ProtocolError,
    Unsupported,
    InternalError,
}

impl Cause {
    /// Relative severity used when aggregating fan-out results: the worst
    /// cause across a set of sub-operations wins. Higher is worse.
    fn severity(self) -> u8 {
        match self {
            Cause::Ok => 0,
            Cause::Already => 1,
            Cause::NotFound => 2,
            Cause::Forbidden => 3,
            Cause::Unsupported => 4,
            Cause::ProtocolError => 5,
            Cause::NetworkError => 6,
            Cause::InternalError => 7,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Cause::Ok => "OK",
            Cause::Already => "Already",
            Cause::Forbidden => "Forbidden",
            Cause::NotFound => "NotFound",
            Cause::NetworkError => "NetworkError",
            Cause::ProtocolError => "ProtocolError",
            Cause::Unsupported => "Unsupported",
            Cause::InternalError => "InternalError",
        }
    }
}

impl fmt::Display for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of a blob operation: a `Cause` plus an optional human-readable
/// explanation (often carrying the back-end's native error code or message).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    cause: Cause,
    message: Option<String>,
}

impl Status {
    pub fn new(cause: Cause) -> Self {
        Self {
            cause,
            message: None,
        }
    }

    pub fn with_message(cause: Cause, message: impl Into<String>) -> Self {
        Self {
            cause,
            message: Some(message.into()),
        }
    }

    pub fn ok() -> Self {
        Self::new(Cause::Ok)
    }

    pub fn is_ok(&self) -> bool {
        self.cause == Cause::Ok
    }

    pub fn cause(&self) -> Cause {
        self.cause
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Worst-severity cause across a set of sub-operation statuses, per the
    /// ordering InternalError > NetworkError > ProtocolError > Unsupported >
    /// Forbidden > NotFound > Already > OK (see `Cause::severity`).
    pub fn worst<'a>(statuses: impl IntoIterator<Item = &'a Status>) -> Status {
        let mut worst = Status::ok();
        for s in statuses {
            if s.cause.severity() > worst.cause.severity() {
                worst = s.clone();
            }
        }
        worst
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(msg) => write!(f, "{}: {}", self.cause, msg),
            None => write!(f, "{}", self.cause),
        }
    }
}

impl std::error::Error for Status {}

impl From<Cause> for Status {
    fn from(cause: Cause) -> Self {
        Status::new(cause)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_status_is_ok() {
        assert!(Status::ok().is_ok());
        assert!(!Status::new(Cause::NotFound).is_ok());
    }

    #[test]
    fn worst_picks_highest_severity() {
        let statuses = vec![
            Status::ok(),
            Status::new(Cause::Already),
            Status::new(Cause::NetworkError),
            Status::new(Cause::NotFound),
        ];
        assert_eq!(Status::worst(&statuses).cause(), Cause::NetworkError);
    }

    #[test]
    fn worst_of_all_ok_is_ok() {
        let statuses = vec![Status::ok(), Status::ok()];
        assert!(Status::worst(&statuses).is_ok());
    }
}
