pub mod prelude;

pub mod optimism_deposits;
