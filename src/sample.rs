//! Just the [`Sample`] struct.

use std::ops::Deref;
use tracing::trace;

/// One collected payload, along with the tracing span of its collection.
///
/// The span is created when the data is collected and closes when the
/// `Sample` is dropped, after the payload has been handed to the stream. The
/// write is instrumented with the same span, so a slow or failed write shows
/// up under the collection that produced it.
#[derive(Debug)]
pub struct Sample {
    payload: Vec<u8>,
    span: tracing::Span,
}

impl Deref for Sample {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.payload
    }
}

impl Sample {
    /// Wrap a payload collected for `metric`.
    pub fn new(metric: &str, payload: Vec<u8>, span: tracing::Span) -> Self {
        crate::metrics::record_sample(metric, payload.len());
        Self { payload, span }
    }

    /// The tracing span associated with this sample.
    pub fn span(&self) -> &tracing::Span {
        &self.span
    }

    /// Take the payload, leaving the sample empty.
    pub fn take_payload(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.payload)
    }
}

impl Drop for Sample {
    fn drop(&mut self) {
        self.span.in_scope(|| {
            trace!("Dropping sample");
        });
        crate::metrics::release_sample();
    }
}
