pub mod admission;
pub mod case_selector;
pub mod failure_escalator;
pub mod load_test;
pub mod log_broadcaster;
pub mod orchestrator;
pub mod run_registry;
