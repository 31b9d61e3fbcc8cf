//! SQLite database for the Anyattend backend.

anyattend_core::define_database!(BackendDatabase, "Backend database migrations complete");
