// resumable-hal demo firmware for ESP32-C3 + MCP2515
//
// Boot sequence: timer -> board -> CAN controller -> scheduler tasks
// The 1 ms timer interrupt advances the clock and ticks the scheduler;
// scheduled tasks run inside that interrupt. The main loop drives a
// protothread that polls a two-wire temperature sensor, then WFI.
//
// Host builds only get an empty main so the library tests link.

#![cfg_attr(target_arch = "riscv32", no_std)]
#![cfg_attr(target_arch = "riscv32", no_main)]

#[cfg(target_arch = "riscv32")]
mod firmware {
    use esp_backtrace as _;
    use esp_hal::clock::CpuClock;
    use esp_hal::gpio::{Input, Output};
    use esp_hal::time::Duration;
    use esp_hal::timer::PeriodicTimer;
    use esp_hal::timer::timg::TimerGroup;
    use log::{info, warn};

    use core::cell::RefCell;
    use critical_section::Mutex;
    use static_cell::StaticCell;

    use resumable_hal::board::{Board, CAN_OSCILLATOR_HZ, I2cBus, SpiBus};
    use resumable_hal::drivers::can::Message;
    use resumable_hal::drivers::i2c::I2cMaster;
    use resumable_hal::drivers::i2c_device::I2cDevice;
    use resumable_hal::drivers::mcp2515::{FilterConfig, Mcp2515};
    use resumable_hal::drivers::spi::SharedSpiBus;
    use resumable_hal::kernel::clock::wait_for_interrupt;
    use resumable_hal::kernel::timer;
    use resumable_hal::kernel::{
        Clock, Context, CoroutineResult, Protothread, Scheduler, Task, Thread, TickClock,
    };

    esp_bootloader_esp_idf::esp_app_desc!();

    const TICK_MS: u32 = 1;
    const CAN_BITRATE: u32 = 125_000;
    const CAN_TOLERANCE_PERMILLE: u16 = 10;
    const CAN_PRIORITY: u8 = 2;
    const HEARTBEAT_MS: u32 = 1000;
    const HEARTBEAT_ID: u32 = 0x100;
    const SENSOR_ADDRESS: u8 = 0x48;
    const SENSOR_PERIOD_MS: u32 = 500;

    // who drives what
    const BOOT_CTX: Context = Context::new(1);
    const CAN_CTX: Context = Context::new(2);
    const SENSOR_CTX: Context = Context::new(3);
    // lease identity of the CAN controller on SPI2
    const CAN_DEVICE: Context = Context::new(0x2515);

    type Can = Mcp2515<'static, SpiBus, Output<'static>, Input<'static>, &'static TickClock>;

    static TIMER0: Mutex<RefCell<Option<PeriodicTimer<'static, esp_hal::Blocking>>>> =
        Mutex::new(RefCell::new(None));
    static CLOCK: TickClock = TickClock::new();
    static SCHEDULER: Scheduler<'static, 4> = Scheduler::new();
    static SPI_BUS: StaticCell<SharedSpiBus<SpiBus>> = StaticCell::new();
    static CAN_TASK: StaticCell<CanTask> = StaticCell::new();

    #[esp_hal::handler(priority = esp_hal::interrupt::Priority::Priority1)]
    fn timer0_handler() {
        critical_section::with(|cs| {
            if let Some(timer) = TIMER0.borrow_ref_mut(cs).as_mut() {
                timer.clear_interrupt();
            }
        });
        CLOCK.advance(TICK_MS);
        SCHEDULER.tick();
    }

    // moves frames every tick, sends a heartbeat once a second
    struct CanTask {
        can: Can,
        heartbeat: timer::PeriodicTimer,
        count: u32,
    }

    impl Task for CanTask {
        fn run(&mut self) {
            if let CoroutineResult::Stop(Err(e)) = self.can.update(CAN_CTX) {
                warn!("can: {}", e);
            }
            while let Some(message) = self.can.get_message() {
                info!("can rx {}", message);
            }
            if self.heartbeat.execute(&CLOCK) {
                self.count = self.count.wrapping_add(1);
                let frame = Message::with_data(HEARTBEAT_ID, false, &self.count.to_le_bytes());
                if !self.can.send_message(&frame) {
                    warn!("can: tx queue full ({} dropped)", self.can.tx_overflows());
                }
            }
        }
    }

    // reads the temperature register twice a second
    struct SensorThread {
        pt: Protothread,
        bus: I2cBus,
        sensor: I2cDevice<2>,
        timeout: timer::Timeout,
    }

    impl Thread for SensorThread {
        fn run(&mut self) -> bool {
            loop {
                match self.pt.point() {
                    Some(0) => {
                        self.timeout.start(&CLOCK, SENSOR_PERIOD_MS);
                        self.pt.yield_at(1);
                    }
                    Some(1) => {
                        if let Some(r) = self.pt.wait_until(1, self.timeout.is_expired(&CLOCK)) {
                            return r;
                        }
                        self.pt.yield_at(2);
                    }
                    Some(2) => {
                        let result = self.sensor.write_read(SENSOR_CTX, &mut self.bus, &[0x00], 2);
                        let ok = match self.pt.wait_call(2, result) {
                            Ok(ok) => ok,
                            Err(r) => return r,
                        };
                        match (ok, self.sensor.read_data()) {
                            (true, &[hi, lo]) => {
                                // 12-bit two's complement, 1/16 degree per LSB
                                let value = i16::from_be_bytes([hi, lo]) >> 4;
                                let frac = (value % 16).abs() * 100 / 16;
                                info!("sensor: {}.{:02} C", value / 16, frac);
                            }
                            _ => warn!("sensor: {}", self.bus.error()),
                        }
                        self.pt.yield_at(0);
                        return true;
                    }
                    _ => return false,
                }
            }
        }

        fn is_running(&self) -> bool {
            self.pt.is_running()
        }
    }

    #[esp_hal::main]
    fn main() -> ! {
        esp_println::logger::init_logger_from_env();
        let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
        let peripherals = esp_hal::init(config);

        info!("booting...");

        let timg0 = TimerGroup::new(unsafe { peripherals.TIMG0.clone_unchecked() });
        let mut timer0 = PeriodicTimer::new(timg0.timer0);
        critical_section::with(|cs| {
            timer0.set_interrupt_handler(timer0_handler);
            timer0.start(Duration::from_millis(TICK_MS as u64)).unwrap();
            timer0.listen();
            TIMER0.borrow_ref_mut(cs).replace(timer0);
        });
        info!("timer initialized.");

        let board = Board::init(peripherals);
        let spi = SPI_BUS.init(SharedSpiBus::new(board.can.spi));
        let mut can: Can = Mcp2515::new(spi, board.can.cs, board.can.int, &CLOCK, CAN_DEVICE);

        // the tick interrupt keeps the clock running while we spin here
        match nb::block!(
            can.initialize::<CAN_OSCILLATOR_HZ, CAN_BITRATE, CAN_TOLERANCE_PERMILLE>(BOOT_CTX)
                .into_nb()
        ) {
            Ok(Ok(())) => info!("can initialized."),
            Ok(Err(e)) => warn!("can init failed: {}", e),
            Err(e) => warn!("can init refused: {}", e),
        }
        match nb::block!(can.set_filters(BOOT_CTX, &FilterConfig::accept_all()).into_nb()) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("can filters: {}", e),
            Err(e) => warn!("can filters refused: {}", e),
        }

        let task = CAN_TASK.init(CanTask {
            can,
            heartbeat: timer::PeriodicTimer::new(&CLOCK, HEARTBEAT_MS),
            count: 0,
        });
        if let Err(e) = SCHEDULER.schedule(task, 1, CAN_PRIORITY) {
            warn!("sched: {}", e);
        }
        info!("scheduler running, uptime {} ms", CLOCK.now_ms());

        let mut sensor = SensorThread {
            pt: Protothread::new(),
            bus: board.i2c,
            sensor: I2cDevice::new(SENSOR_ADDRESS),
            timeout: timer::Timeout::new(),
        };

        loop {
            sensor.run();
            wait_for_interrupt();
        }
    }
}

#[cfg(not(target_arch = "riscv32"))]
fn main() {}
