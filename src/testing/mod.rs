mod harness;
mod placement_scenarios;
