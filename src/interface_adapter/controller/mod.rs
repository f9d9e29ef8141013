pub mod bridge_controller;
