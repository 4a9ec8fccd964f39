// Test module organization
pub mod test_env;
pub mod test_matcher;
pub mod test_trace;
