#![cfg(test)]

use crate::{
    buffer::{Buffer, BufferCreateInfo},
    device::Device,
    format::Format,
    image::{Image, ImageCreateInfo, ImageUsage},
    memory::MemoryAllocateInfo,
    monitor::ErrorMonitor,
    Id,
};

/// Creates a device in the default environment, or the given one, and a monitor for it.
macro_rules! test_device {
    () => {
        test_device!($crate::environment::EnvironmentCreateInfo::default())
    };
    ($environment:expr) => {{
        let environment = $crate::environment::Environment::new($environment).unwrap();
        let device = $crate::device::Device::new(
            environment,
            $crate::device::DeviceCreateInfo::default(),
        )
        .unwrap();

        (device, $crate::monitor::ErrorMonitor::default())
    }};
}

/// Creates a device on Android, with the hardware buffer extension.
macro_rules! android_device {
    () => {
        test_device!($crate::environment::EnvironmentCreateInfo::android())
    };
}

/// Expects the given codes, performs the operation and verifies the monitor. Evaluates to the
/// result of the operation.
macro_rules! assert_diagnostics {
    ($monitor:expr, [], $operation:expr $(,)?) => {{
        let monitor = &$monitor;
        monitor.expect_success();
        let result = $operation;

        if let Err(err) = monitor.verify_found() {
            panic!("{err}");
        }

        result
    }};
    ($monitor:expr, [$($vuid:expr),+ $(,)?], $operation:expr $(,)?) => {{
        let monitor = &$monitor;
        $(monitor.expect($vuid);)+
        let result = $operation;

        if let Err(err) = monitor.verify_found() {
            panic!("{err}");
        }

        result
    }};
}

/// Returns the create info of a single-level 2D color image that can be sampled and cleared.
pub(crate) fn color_image_info(format: Format, extent: [u32; 3]) -> ImageCreateInfo {
    ImageCreateInfo {
        format,
        extent,
        usage: ImageUsage::SAMPLED | ImageUsage::TRANSFER_DST,
        ..Default::default()
    }
}

/// Creates an image and binds it to a new allocation of exactly its size.
pub(crate) fn bound_image(
    device: &Device,
    monitor: &ErrorMonitor,
    create_info: ImageCreateInfo,
) -> Id<Image> {
    let image = device.create_image(monitor, create_info).unwrap();
    let requirements = device.image_memory_requirements(monitor, image).unwrap();
    let memory = device
        .allocate_memory(
            monitor,
            MemoryAllocateInfo {
                allocation_size: requirements.size,
                memory_type_index: requirements.memory_type_bits.trailing_zeros(),
                ..Default::default()
            },
        )
        .unwrap();
    device.bind_image_memory(monitor, image, memory, 0).unwrap();

    image
}

/// Creates a buffer and binds it to a new allocation of exactly its size.
pub(crate) fn bound_buffer(
    device: &Device,
    monitor: &ErrorMonitor,
    create_info: BufferCreateInfo,
) -> Id<Buffer> {
    let buffer = device.create_buffer(monitor, create_info).unwrap();
    let requirements = device.buffer_memory_requirements(buffer).unwrap();
    let memory = device
        .allocate_memory(
            monitor,
            MemoryAllocateInfo {
                allocation_size: requirements.size,
                memory_type_index: requirements.memory_type_bits.trailing_zeros(),
                ..Default::default()
            },
        )
        .unwrap();
    device.bind_buffer_memory(monitor, buffer, memory, 0).unwrap();

    buffer
}

#[test]
fn helpers() {
    let (device, monitor) = test_device!();

    let image = assert_diagnostics!(
        monitor,
        [],
        bound_image(
            &device,
            &monitor,
            color_image_info(Format::R8G8B8A8_UNORM, [8, 8, 1]),
        ),
    );
    assert!(device.resources().image(image).unwrap().is_bound());

    let err = assert_diagnostics!(
        monitor,
        ["VUID-VkImageCreateInfo-extent-00944"],
        device.create_image(&monitor, color_image_info(Format::R8G8B8A8_UNORM, [0, 8, 1])),
    )
    .unwrap_err();
    assert_eq!(err.kind(), crate::ErrorKind::InvalidParams);

    // Nothing was emitted outside of the scenarios.
    monitor.finish().unwrap();
}
