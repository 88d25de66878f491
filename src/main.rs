//! rowan: a small supervisor-mode kernel for the QEMU RISC-V `virt`
//! machine. Boot brings up translation over an identity map, mounts the
//! boot ext2 volume, loads the init process and then schedules
//! cooperatively forever.

#![cfg_attr(target_arch = "riscv64", no_std)]
#![cfg_attr(target_arch = "riscv64", no_main)]

extern crate alloc;

mod asm;
#[macro_use]
mod macros;

mod arch;
mod driver;
mod fs;
mod kernel;
mod logk;
mod mm;
mod proc;
mod sched;
mod syscall;
mod trap;
mod util;

#[cfg(target_arch = "riscv64")]
mod bringup {
    use alloc::boxed::Box;
    use alloc::vec;

    use crate::arch;
    use crate::driver::block::MemDisk;
    use crate::driver::uart::Uart;
    use crate::driver::{fdt, virtio};
    use crate::fs::ext2::Ext2Filesystem;
    use crate::fs::{console, resolve_path, FileType};
    use crate::kernel::{self, Kernel};
    use crate::mm::mmu::{map_kernel, RootTable};
    use crate::mm::page::{self, PageAllocator};
    use crate::mm::virt_qemu::VIRT_DRAM_BASE;
    use crate::mm::KernelLayout;
    use crate::proc::{elf, Pid, ProcessTable};
    use crate::sched::{self, JobQueue};
    use crate::logk;
    use crate::trap::plic::{self, IrqTable};

    /// Executable the kernel hands PID 1 to.
    const INIT_PATH: &str = "/bin/init";
    const INIT_STACK_PAGES: usize = 2;
    const MAX_PROCESSES: usize = 1024;
    const JOB_QUEUE_CAPACITY: usize = 4096;
    /// UART receive interrupt on the `virt` machine.
    const UART_IRQ: u32 = 10;
    /// RAM to assume when the device tree is unusable.
    const FALLBACK_DRAM_SIZE: usize = 128 << 20;

    #[panic_handler]
    fn panic(info: &core::panic::PanicInfo) -> ! {
        println_k!("{}", info);
        arch::halt();
    }

    /// Echo console input back. Installed as the UART's external
    /// interrupt handler.
    fn uart_echo(_irq: u32) {
        let uart = Uart::default();
        while let Some(c) = uart.get() {
            match c {
                10 | 13 => println_k!(),
                _ => print_k!("{}", (c as char).escape_default()),
            }
        }
    }

    /// Resolve, read and load the init executable as PID 1, wiring the
    /// console onto its standard descriptors.
    fn spawn_init(k: &mut Kernel, alloc: &mut dyn PageAllocator) -> Pid {
        let Some(root) = k.root_dir.as_mut() else {
            return 0;
        };
        let Some(mut entry) = resolve_path(root, INIT_PATH) else {
            log::error!("{} not found on the boot volume", INIT_PATH);
            return 0;
        };
        if entry.kind != FileType::Regular {
            log::error!("{} is not a regular file", INIT_PATH);
            return 0;
        }
        let size = entry.file.size() as usize;
        let mut image = vec![0u8; size];
        if entry.file.read(&mut image) != size {
            log::error!("short read of {}", INIT_PATH);
            return 0;
        }
        let parsed = match elf::parse(&image) {
            Ok(parsed) => parsed,
            Err(e) => {
                log::error!("{}: {}", INIT_PATH, e);
                return 0;
            }
        };

        let pid = k.procs.load_elf(0, &parsed, INIT_STACK_PAGES, alloc);
        if pid == 0 {
            return 0;
        }
        k.procs.init_kernel_mmu(pid, &k.mmu_root);

        let (stdin, stdout, stderr) = console::make_stdio(Uart::default());
        if let Some(fds) = k.procs.fetch_mut(pid).and_then(|p| p.fds_mut()) {
            fds.set(0, stdin);
            fds.set(1, stdout);
            fds.set(2, stderr);
        }
        k.jobs.add(pid);
        pid
    }

    #[no_mangle]
    extern "C" fn kmain(hart_id: usize, dtb: *const u8) -> ! {
        let uart = Uart::default();
        uart.init();
        logk::init();
        log::info!("rowan starting on hart {}", hart_id);

        let fdt = unsafe { fdt::parse_from_ptr(dtb) };
        fdt::show_boot_info(&fdt);
        let (mem_start, mem_size) = fdt::main_memory_region(&fdt)
            .unwrap_or((VIRT_DRAM_BASE, FALLBACK_DRAM_SIZE));
        let memory_end = mem_start + mem_size;

        let heap_start = unsafe { crate::asm::mem_v::heap_start() };
        unsafe { page::init_kernel_pool(heap_start, memory_end) };
        let pool = page::kernel_pool();

        // Identity map and switch translation on. Every page table lives
        // in the pool, which the map covers wholesale, so the tables stay
        // readable once satp is live.
        let layout = KernelLayout::from_linker(memory_end);
        let mut mmu_root = RootTable::new(pool).expect("no memory for the kernel root table");
        map_kernel(&mut mmu_root, &layout, pool);
        arch::cpu::satp_write(mmu_root.satp());
        log::info!("translation on, kernel root at {:#x}", mmu_root.addr());

        virtio::scan();

        // The boot volume image is linked into the kernel; the block
        // transport for real disks lives outside this kernel.
        let disk = unsafe {
            MemDisk::from_region(
                crate::asm::mem_v::disk_image_start(),
                crate::asm::mem_v::disk_image_end(),
            )
        };
        let root_dir = match Ext2Filesystem::mount(Box::new(disk)) {
            Ok(root) => Some(root),
            Err(e) => {
                log::error!("boot volume mount failed: {:?}", e);
                None
            }
        };

        let mut irqs = IrqTable::new();
        plic::open_threshold();
        if let Err(e) = plic::register_mei_handler(&mut irqs, UART_IRQ, 1, uart_echo) {
            log::warn!("uart interrupt registration failed: {:?}", e);
        }
        arch::cpu::sie_enable_external();
        arch::sbi::clear_timer();

        let mut k = Kernel {
            procs: ProcessTable::new(MAX_PROCESSES),
            jobs: JobQueue::new(JOB_QUEUE_CAPACITY),
            irqs,
            mmu_root,
            root_dir,
        };
        let init_pid = spawn_init(&mut k, page::kernel_pool());
        if init_pid == 0 {
            log::error!("no init process; dropping to console echo only");
        } else {
            log::info!("init is pid {}", init_pid);
        }

        unsafe { kernel::install(k) };

        // Traps taken outside any process (the scheduler's idle path)
        // spill into this frame; its pid of 0 tells the handler to just
        // resume the interrupted kernel code.
        static mut IDLE_FRAME: crate::trap::TrapFrame = crate::trap::TrapFrame::zeroed();
        let idle_frame = unsafe { core::ptr::addr_of!(IDLE_FRAME) } as usize;
        arch::cpu::sscratch_write(idle_frame);
        arch::cpu::sstatus_enable_interrupts();

        sched::schedule_loop(kernel::kernel())
    }
}

#[cfg(not(target_arch = "riscv64"))]
#[allow(dead_code)]
fn main() {}
