//! Scenario tests on the reference engine.

mod helpers;
mod stop_tests;
