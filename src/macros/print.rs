// `print*!`-alikes writing straight to the console UART.

#[macro_export]
macro_rules! print_k {
    ($($args:tt)+) => ({
        use core::fmt::Write;
        let _ = write!($crate::driver::uart::Uart::default(), $($args)+);
    });
}

#[macro_export]
macro_rules! println_k {
    () => {
        $crate::print_k!("\n")
    };
    ($fmt:expr) => {
        $crate::print_k!(concat!($fmt, "\n"))
    };
    ($fmt:expr, $($args:tt)+) => {
        $crate::print_k!(concat!($fmt, "\n"), $($args)+)
    };
}
