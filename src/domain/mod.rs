pub mod bug;
pub mod case;
pub mod error;
pub mod run;
pub mod suite;
