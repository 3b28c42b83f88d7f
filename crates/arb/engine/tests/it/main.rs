mod common;
mod digest;
mod finality;
mod processing;
mod reorg;
