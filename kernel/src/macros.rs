/// Logs a virtual memory event when the `vm_trace` feature is enabled.
///
/// Arguments are still type-checked without the feature, so trace-only
/// bindings never trigger unused warnings.
macro_rules! vm_trace {
    ($($arg:tt)*) => {
        if cfg!(feature = "vm_trace") {
            pagewright_shared::println!("[vm] {}", format_args!($($arg)*));
        }
    };
}
