//! Shared fixtures for the database-level tests.

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use crate::merge::operators::U64AddOperator;
use crate::merge::AssociativeOperatorAdapter;
use crate::options::{ColumnFamilyOptions, DbOptions, Options};

/// Initialize tracing controlled by `RUST_LOG`. Safe to call repeatedly —
/// only the first call takes effect.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Options whose write buffer is large enough that nothing flushes unless
/// a test asks for it.
pub fn memtable_only_options() -> Options {
    init_tracing();
    Options {
        db: DbOptions {
            create_if_missing: true,
            ..DbOptions::default()
        },
        cf: ColumnFamilyOptions {
            write_buffer_size: 8 * 1024 * 1024,
            ..ColumnFamilyOptions::default()
        },
    }
}

/// Options with a tiny write buffer so memtable switches happen quickly.
pub fn small_buffer_options() -> Options {
    init_tracing();
    Options {
        db: DbOptions {
            create_if_missing: true,
            ..DbOptions::default()
        },
        cf: ColumnFamilyOptions {
            write_buffer_size: 4 * 1024,
            max_write_buffer_number: 4,
            ..ColumnFamilyOptions::default()
        },
    }
}

/// Column family options carrying the u64-add merge operator.
pub fn counter_cf_options() -> ColumnFamilyOptions {
    ColumnFamilyOptions {
        merge_operator: Some(Arc::new(AssociativeOperatorAdapter::new(U64AddOperator))),
        ..ColumnFamilyOptions::default()
    }
}

/// Options bundle with the u64-add operator on the default family.
pub fn counter_options() -> Options {
    init_tracing();
    Options {
        db: DbOptions {
            create_if_missing: true,
            ..DbOptions::default()
        },
        cf: counter_cf_options(),
    }
}

/// Poll `condition` for up to ~5 seconds.
pub fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        std::thread::sleep(std::time::Duration::from_millis(50));
    }
    condition()
}
