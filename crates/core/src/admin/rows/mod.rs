mod list_rows;
mod update_rows;

pub(super) use list_rows::list_rows_handler;
pub(super) use update_rows::update_rows_handler;
