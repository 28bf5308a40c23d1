//! Integration tests: mock merchant plus end-to-end haggle sessions.

mod mock_surface;
mod simulation;
