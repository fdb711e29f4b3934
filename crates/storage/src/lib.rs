pub mod memory;
pub mod sled;

pub use memory::MemoryDB;
pub use self::sled::SledDB;
