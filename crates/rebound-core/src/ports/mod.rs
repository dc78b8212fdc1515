//! Ports - 抽象化レイヤー
//!
//! 外部システム（永続化、キュー、時刻、ID 生成、タスク本体）への
//! インターフェースを定義します。Processor と Monitor は構築時に
//! これらを注入され、グローバルな client には触れません。
//!
//! 実装は `impls`（in-memory）にあり、起動時に一度だけ選びます。

pub mod clock;
pub mod id_generator;
pub mod task_queue;
pub mod task_store;
pub mod transport;
pub mod work;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::task_queue::TaskQueue;
pub use self::task_store::TaskStore;
pub use self::transport::{DeliveryTransport, ReceivedMessage};
pub use self::work::UnitOfWork;
