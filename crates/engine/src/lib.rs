pub mod config;
pub mod engine;
pub mod error;
pub mod http_price;
pub mod ledger;
pub mod price_feed;
pub mod session;
pub mod shell;
pub mod wallet;

pub use config::{create_example_config, EngineConfig, PriceConfig, WalletConfig, WidgetEnvironment, WidgetSettings};
pub use engine::{describe_open_failure, EngineDeps, EngineSnapshot, ReconciliationEngine};
pub use error::{EngineError, EngineResult};
pub use http_price::HttpPriceSource;
pub use ledger::TransactionLedger;
pub use price_feed::{PriceFeedAggregator, PriceFlight, PriceSource};
pub use session::{
    PurchaseWidget, SessionContext, SessionController, SessionEvent, SessionHandle, SessionId, WidgetConfig,
    WidgetEvent, WidgetEventHandler, WidgetFactory,
};
pub use shell::{ConsoleWidgetFactory, StaticWalletProvider};
pub use wallet::{
    implied_state, next_state, FactKind, ListenerId, NoticeHandler, ProviderError, WalletFact, WalletMonitor, WalletNotice,
    WalletProvider,
};
