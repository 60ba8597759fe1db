mod tests_format;
mod tests_roundtrip;
mod tests_straddle;
