//! Contract tests: the externally promised properties of the engine

mod test_scenarios;
