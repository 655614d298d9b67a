use std::time::Duration;

use x509_cert::der::pem::LineEnding;

/// The default CA validity time span of one year.
pub const DEFAULT_CA_VALIDITY: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// The default leaf certificate validity time span of 90 days.
pub const DEFAULT_CERTIFICATE_VALIDITY: Duration = Duration::from_secs(90 * 24 * 60 * 60);

/// The root CA subject name containing only the common name.
pub const TRACEHOUSE_ROOT_CA_SUBJECT: &str = "CN=Tracehouse Internal CA";

/// The line ending used for all PEM-encoded artifacts.
pub const PEM_LINE_ENDING: LineEnding = LineEnding::LF;
