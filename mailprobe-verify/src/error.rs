use thiserror::Error;

/// A resolution that could not be completed.
///
/// A domain that definitively has no mail exchangers is not an error; the
/// resolver returns an empty list for it. Every variant here is transient.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("DNS lookup failed for {domain}: {source}")]
    LookupFailed {
        domain: String,
        #[source]
        source: hickory_resolver::ResolveError,
    },

    #[error("Unable to initialise resolver: {0}")]
    Init(#[from] hickory_resolver::ResolveError),
}
