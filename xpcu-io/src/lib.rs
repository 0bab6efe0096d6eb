mod backend;
pub mod cables;
mod chain;
pub mod devices;
mod error;
pub mod jtag;
pub mod sim;
pub mod units;
mod utils;
pub mod xpc;

pub use crate::{
    backend::{Backend, Identity},
    chain::{Cancel, Chain, ChainDevice, MAX_DEVICES, TestReport},
    error::{Error, Fault, Part, Result},
    utils::{Hex, SpaceHex},
};
