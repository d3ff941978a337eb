mod btree_index;
mod btree_node;
mod btree_scan;
mod index_manager;

pub use btree_index::BTreeIndex;
pub use btree_node::{IndexFileHeader, NodeMut, NodeRef, NODE_HDR_SIZE, RID_SIZE};
pub use btree_scan::IxScan;
pub use index_manager::IndexManager;
