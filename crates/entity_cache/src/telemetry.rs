// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Log events describing what the cache does with each request.

use crate::CacheName;

/// Field names attached to every cache event.
#[cfg(test)]
pub(crate) mod attributes {
    pub(crate) const CACHE_NAME: &str = "cache.name";
    pub(crate) const CACHE_OPERATION: &str = "cache.operation";
    pub(crate) const CACHE_ACTIVITY: &str = "cache.activity";
    pub(crate) const CACHE_COUNT: &str = "cache.count";
    pub(crate) const CACHE_EVENT: &str = "cache.event";
}

/// The public operation an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Operation {
    Get,
    Batch,
    All,
    Flush,
}

impl Operation {
    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Batch => "batch",
            Self::All => "all",
            Self::Flush => "flush",
        }
    }
}

/// What happened while serving an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Activity {
    /// A fetch was dispatched to the backing source.
    Fetch,
    /// Requested entities the source did not return.
    Absent,
    /// The backing source returned an error.
    Failed,
    /// Pending requests were abandoned.
    Flushed,
}

impl Activity {
    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            Self::Fetch => "fetch",
            Self::Absent => "absent",
            Self::Failed => "failed",
            Self::Flushed => "flushed",
        }
    }
}

#[cfg_attr(
    not(any(feature = "logs", test)),
    expect(unused_variables, reason = "unused when logs feature not used")
)]
pub(crate) fn emit(cache_name: CacheName, operation: Operation, activity: Activity, count: usize) {
    #[cfg(any(feature = "logs", test))]
    {
        let op = operation.as_str();
        let ev = activity.as_str();

        // Tracing level must be constant, so a macro selects the level per activity.
        macro_rules! emit_event {
            ($level:ident) => {
                tracing::$level!(
                    cache.name = cache_name,
                    cache.operation = op,
                    cache.activity = ev,
                    cache.count = count,
                    "cache.event"
                )
            };
        }

        match activity {
            Activity::Failed => emit_event!(warn),
            Activity::Flushed => emit_event!(info),
            Activity::Fetch | Activity::Absent => emit_event!(debug),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    use tracing_subscriber::fmt::MakeWriter;

    /// Captures formatted log output into a shared buffer.
    #[derive(Debug, Clone, Default)]
    pub(crate) struct LogCapture {
        buffer: Arc<Mutex<Vec<u8>>>,
    }

    impl LogCapture {
        pub(crate) fn output(&self) -> String {
            String::from_utf8_lossy(&self.buffer.lock().unwrap()).to_string()
        }

        pub(crate) fn assert_contains(&self, expected: &str) {
            let output = self.output();
            assert!(output.contains(expected), "log output does not contain '{expected}', got:\n{output}");
        }

        /// Use with `tracing::subscriber::set_default()` for thread-local capture.
        pub(crate) fn subscriber(&self) -> impl tracing::Subscriber {
            use tracing_subscriber::layer::SubscriberExt;
            tracing_subscriber::registry().with(tracing_subscriber::fmt::layer().with_writer(self.clone()).with_ansi(false))
        }
    }

    impl<'a> MakeWriter<'a> for LogCapture {
        type Writer = LogCaptureWriter;

        fn make_writer(&'a self) -> Self::Writer {
            LogCaptureWriter {
                buffer: Arc::clone(&self.buffer),
            }
        }
    }

    pub(crate) struct LogCaptureWriter {
        buffer: Arc<Mutex<Vec<u8>>>,
    }

    impl Write for LogCaptureWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.buffer.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
