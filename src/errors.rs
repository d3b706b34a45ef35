use std::{error, fmt, io};

#[derive(Debug)]
pub enum Error {
    /// `put`/`del` was given an empty raw key.
    ZeroLengthKey,
    /// Integer too large for the integer-key embedding.
    IntRangeExceeded,
    /// Key bytes are not in the integer-key embedding format.
    NotIntegerKey,
    /// An update, diff, or walk reached an opaque witness node.
    WitnessEncountered,
    /// A read needed a value that is only present as a witness.
    IncompleteTree,
    /// A deletion would have to collapse through an opaque witness.
    CannotBubbleWitness,
    /// Proof decoding, structural validation, or hash check failed.
    ProofInvalid(String),
    /// An imported sync fragment disagrees with the recorded subtree hash.
    SyncMismatch(String),
    /// Recursion descended past bit 255 of the key space (hash collision).
    DepthLimitExceeded,
    NotFoundError,
    ExistsError,
    CorruptionError(String),
    SQLError(String),
    IOError(io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::ZeroLengthKey => write!(f, "zero-length keys not allowed"),
            Error::IntRangeExceeded => write!(f, "int range exceeded"),
            Error::NotIntegerKey => write!(f, "key is not in integer format"),
            Error::WitnessEncountered => {
                write!(f, "encountered witness node during update: partial tree")
            }
            Error::IncompleteTree => write!(f, "encountered witness node: incomplete tree"),
            Error::CannotBubbleWitness => write!(f, "can't bubble a witness node"),
            Error::ProofInvalid(ref s) => write!(f, "proof invalid: {}", s),
            Error::SyncMismatch(ref s) => write!(f, "sync mismatch: {}", s),
            Error::DepthLimitExceeded => write!(f, "tree depth exceeded 255 levels"),
            Error::NotFoundError => write!(f, "object not found"),
            Error::ExistsError => write!(f, "object exists"),
            Error::CorruptionError(ref s) => write!(f, "corruption: {}", s),
            Error::SQLError(ref s) => fmt::Display::fmt(s, f),
            Error::IOError(ref e) => fmt::Display::fmt(e, f),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            Error::IOError(ref e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::IOError(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::SQLError(err.to_string())
    }
}
