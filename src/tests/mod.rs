//! Cross-module lifecycle and scenario tests driving the full service
//! graph on in-memory stores with a scripted LLM.

mod lifecycle_tests;
