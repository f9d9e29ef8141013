pub mod strategy_factory;
