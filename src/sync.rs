pub use core::{
    cell::UnsafeCell,
    hint::spin_loop,
    mem::MaybeUninit,
    sync::atomic::{AtomicBool, AtomicPtr, AtomicU32, AtomicU64, Ordering},
};

pub use std::thread::yield_now;

#[inline(always)]
pub unsafe fn write_cell<T>(cell: &UnsafeCell<MaybeUninit<T>>, value: T) {
    unsafe {
        (*cell.get()).write(value);
    }
}

#[inline(always)]
pub unsafe fn read_cell<T>(cell: &UnsafeCell<MaybeUninit<T>>) -> T {
    unsafe { (*cell.get()).assume_init_read() }
}

#[inline(always)]
pub unsafe fn drop_cell<T>(cell: &UnsafeCell<MaybeUninit<T>>) {
    unsafe { (*cell.get()).assume_init_drop() }
}
