mod encoder;
mod search;
mod support;
