//! Scenario tests spanning several pipeline stages, plus the scripted
//! provider the unit tests share.

pub(crate) mod support;
