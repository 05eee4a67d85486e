/// Router Module Index
///
/// Routes are grouped by who may reach them; access control is attached per group in
/// `create_router`.

/// Health, session state, and the sign-up / sign-in / reset flow.
pub mod public;

/// Catalog API. Requires a resolved session with a signed-in user.
pub mod authenticated;

/// Taxonomy, user, and dashboard management. Requires an admin.
pub mod admin;

/// Guarded pages. Access is decided per page by `guards::authorize`.
pub mod pages;
