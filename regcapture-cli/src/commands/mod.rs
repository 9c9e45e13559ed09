pub mod capture;
pub mod paths;
