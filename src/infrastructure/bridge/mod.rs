pub mod stdio_bridge;
