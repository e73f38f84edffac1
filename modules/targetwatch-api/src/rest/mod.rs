pub mod scan;
pub mod schedules;
