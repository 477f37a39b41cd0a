pub mod learning;
pub mod move_record;
pub mod suggestion;
pub mod whitelist;
