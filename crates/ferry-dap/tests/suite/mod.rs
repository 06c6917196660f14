// Consolidated integration test suite, compiled by `tests/tests.rs` into a
// single test binary.
mod auth;
mod breakpoints;
mod evaluate;
mod launch_flow;
mod process_output;
mod script_result;
mod server;
mod session_basics;
mod terminate;
