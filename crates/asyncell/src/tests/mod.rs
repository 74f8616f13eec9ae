mod common;
mod fingerprint_props;
mod precedents;
