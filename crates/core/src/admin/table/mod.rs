mod create_table;
mod drop_table;
mod list_tables;

pub(super) use create_table::create_table_handler;
pub(super) use drop_table::drop_table_handler;
pub(super) use list_tables::list_tables_handler;
