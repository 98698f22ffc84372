pub mod create_sale_command;
pub mod pay_all_command;
pub mod update_payment_command;
