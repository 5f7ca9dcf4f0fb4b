/// Services used by the route handlers
///
/// - `email`: password reset and invoice emails over SMTP or to disk
/// - `invoice`: HTML invoice documents
/// - `export`: CSV rendering for the dashboard export

pub mod email;
pub mod export;
pub mod invoice;
