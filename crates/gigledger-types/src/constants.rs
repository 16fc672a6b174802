//! System-wide constants for the GigLedger wallet and auth layer.

/// Number of decimal places between major and minor currency units
/// (100 minor units = 1 major unit).
pub const CURRENCY_SCALE: u32 = 2;

/// Minor units per major unit.
pub const MINOR_PER_MAJOR: i64 = 100;

/// Largest single deposit accepted by default: 1,000,000.00.
pub const DEFAULT_MAX_SINGLE_DEPOSIT: i64 = 100_000_000;

/// Smallest withdrawal accepted by default: 1.00.
pub const DEFAULT_MIN_WITHDRAWAL: i64 = 100;

/// Number of request keys remembered by the idempotency guard.
pub const DEFAULT_IDEMPOTENCY_CACHE_SIZE: usize = 100_000;

/// Default session lifetime in seconds (24 hours).
pub const DEFAULT_SESSION_TTL_SECS: i64 = 86_400;

/// Longest accepted session lifetime in seconds (10 years).
pub const MAX_SESSION_TTL_SECS: i64 = 10 * 365 * 86_400;

/// Minimum accepted length for a local password.
pub const DEFAULT_MIN_PASSWORD_LEN: usize = 8;

/// Sliding window for failed login attempts (15 minutes).
pub const DEFAULT_LOGIN_WINDOW_MS: u64 = 15 * 60 * 1000;

/// Failed login attempts allowed per email within the window.
pub const DEFAULT_MAX_LOGIN_ATTEMPTS: usize = 5;

/// Emails with failure windows kept by the login throttle at once.
pub const MAX_THROTTLED_EMAILS: usize = 100_000;

/// Prefix identifying locally issued session tokens.
pub const LOCAL_TOKEN_PREFIX: &str = "glt1";

/// Domain separator for session token signatures.
pub const TOKEN_SIGNING_DOMAIN: &[u8] = b"gigledger:session:v1:";

/// Default name of the external identity provider.
pub const DEFAULT_PROVIDER_NAME: &str = "supabase";

/// Default tracing filter when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "info,gigledger=debug";

/// Version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Service name.
pub const SERVICE_NAME: &str = "GigLedger";
