pub mod adjust_inventory_command;
