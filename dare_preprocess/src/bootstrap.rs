//! Offline device creation for when no renderer is around to lend its device.
use std::ffi::{c_char, c_void, CStr, CString};
use std::ptr;

use ash::vk;
use derivative::Derivative;
use tracing::{debug, info};
#[cfg(feature = "log-lifetimes")]
use tracing::trace;

use crate::context::GpuContext;
use crate::{PreprocessError, Result};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";
const ENGINE_NAME: &CStr = c"dare";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadlessSettings {
    pub application_name: String,
    /// Enables the Khronos validation layer when it is installed
    pub validation: bool,
    pub prefer_discrete: bool,
}

impl Default for HeadlessSettings {
    fn default() -> Self {
        Self {
            application_name: String::from("dare_bake"),
            validation: false,
            prefer_discrete: true,
        }
    }
}

impl HeadlessSettings {
    pub fn set_application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = name.into();
        self
    }

    pub fn set_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    pub fn set_prefer_discrete(mut self, prefer_discrete: bool) -> Self {
        self.prefer_discrete = prefer_discrete;
        self
    }
}

/// A Vulkan 1.3 instance and device with `synchronization2` and a single graphics queue
#[derive(Derivative)]
#[derivative(Debug)]
pub struct HeadlessDevice {
    #[derivative(Debug = "ignore")]
    _entry: ash::Entry,
    #[derivative(Debug = "ignore")]
    instance: ash::Instance,
    physical_device: vk::PhysicalDevice,
    #[derivative(Debug = "ignore")]
    device: ash::Device,
    queue_family: u32,
    queue: vk::Queue,
    name: String,
}

struct Candidate {
    physical_device: vk::PhysicalDevice,
    queue_family: u32,
    score: u32,
    name: String,
}

fn select_physical_device(
    instance: &ash::Instance,
    settings: &HeadlessSettings,
) -> Result<Candidate> {
    let physical_devices = unsafe { instance.enumerate_physical_devices()? };
    physical_devices
        .into_iter()
        .filter_map(|physical_device| {
            let properties = unsafe { instance.get_physical_device_properties(physical_device) };
            let name = properties
                .device_name_as_c_str()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            if properties.api_version < vk::API_VERSION_1_3 {
                debug!("Skipping {}: Vulkan 1.3 unsupported", name);
                return None;
            }

            let mut features_1_3 = vk::PhysicalDeviceVulkan13Features::default();
            {
                let mut features_2 =
                    vk::PhysicalDeviceFeatures2::default().push_next(&mut features_1_3);
                unsafe { instance.get_physical_device_features2(physical_device, &mut features_2) };
            }
            if features_1_3.synchronization2 == vk::FALSE {
                debug!("Skipping {}: synchronization2 unsupported", name);
                return None;
            }

            // blits need a graphics queue
            let queue_family = unsafe {
                instance.get_physical_device_queue_family_properties(physical_device)
            }
            .iter()
            .position(|family| family.queue_flags.contains(vk::QueueFlags::GRAPHICS))?
                as u32;

            let score = match properties.device_type {
                vk::PhysicalDeviceType::DISCRETE_GPU if settings.prefer_discrete => 1000,
                vk::PhysicalDeviceType::DISCRETE_GPU => 100,
                vk::PhysicalDeviceType::INTEGRATED_GPU if settings.prefer_discrete => 100,
                vk::PhysicalDeviceType::INTEGRATED_GPU => 1000,
                vk::PhysicalDeviceType::CPU => 1,
                _ => 10,
            };
            Some(Candidate {
                physical_device,
                queue_family,
                score,
                name,
            })
        })
        .max_by_key(|candidate| candidate.score)
        .ok_or(PreprocessError::NoSuitableDevice)
}

impl HeadlessDevice {
    pub fn new(settings: &HeadlessSettings) -> Result<Self> {
        let entry = unsafe { ash::Entry::load()? };

        let application_name = CString::new(settings.application_name.as_str()).unwrap_or_default();
        let application_info = vk::ApplicationInfo {
            s_type: vk::StructureType::APPLICATION_INFO,
            p_next: ptr::null(),
            p_application_name: application_name.as_ptr(),
            application_version: 0,
            p_engine_name: ENGINE_NAME.as_ptr(),
            engine_version: 0,
            api_version: vk::API_VERSION_1_3,
            _marker: Default::default(),
        };

        let mut layers: Vec<*const c_char> = Vec::new();
        if settings.validation {
            let available = unsafe { entry.enumerate_instance_layer_properties()? };
            if available
                .iter()
                .any(|layer| layer.layer_name_as_c_str() == Ok(VALIDATION_LAYER))
            {
                layers.push(VALIDATION_LAYER.as_ptr());
            } else {
                tracing::warn!("Validation requested but VK_LAYER_KHRONOS_validation is not installed");
            }
        }

        let instance = unsafe {
            entry.create_instance(
                &vk::InstanceCreateInfo {
                    s_type: vk::StructureType::INSTANCE_CREATE_INFO,
                    p_next: ptr::null(),
                    flags: vk::InstanceCreateFlags::empty(),
                    p_application_info: &application_info,
                    enabled_layer_count: layers.len() as u32,
                    pp_enabled_layer_names: layers.as_ptr(),
                    enabled_extension_count: 0,
                    pp_enabled_extension_names: ptr::null(),
                    _marker: Default::default(),
                },
                None,
            )?
        };

        let candidate = match select_physical_device(&instance, settings) {
            Ok(candidate) => candidate,
            Err(e) => {
                unsafe { instance.destroy_instance(None) };
                return Err(e);
            }
        };

        let priorities = [1.0f32];
        let queue_ci = vk::DeviceQueueCreateInfo {
            s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
            p_next: ptr::null(),
            flags: vk::DeviceQueueCreateFlags::empty(),
            queue_family_index: candidate.queue_family,
            queue_count: 1,
            p_queue_priorities: priorities.as_ptr(),
            _marker: Default::default(),
        };
        let mut features_1_3 = vk::PhysicalDeviceVulkan13Features {
            synchronization2: vk::TRUE,
            ..Default::default()
        };
        let features_2 = vk::PhysicalDeviceFeatures2 {
            s_type: vk::StructureType::PHYSICAL_DEVICE_FEATURES_2,
            p_next: &mut features_1_3 as *mut _ as *mut c_void,
            features: Default::default(),
            _marker: Default::default(),
        };
        #[allow(deprecated)]
        let device_ci = vk::DeviceCreateInfo {
            s_type: vk::StructureType::DEVICE_CREATE_INFO,
            p_next: &features_2 as *const _ as *const c_void,
            flags: vk::DeviceCreateFlags::empty(),
            queue_create_info_count: 1,
            p_queue_create_infos: &queue_ci,
            enabled_layer_count: 0,
            pp_enabled_layer_names: ptr::null(),
            enabled_extension_count: 0,
            pp_enabled_extension_names: ptr::null(),
            p_enabled_features: ptr::null(),
            _marker: Default::default(),
        };
        let device =
            match unsafe { instance.create_device(candidate.physical_device, &device_ci, None) } {
                Ok(device) => device,
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e.into());
                }
            };
        let queue = unsafe { device.get_device_queue(candidate.queue_family, 0) };

        #[cfg(feature = "log-lifetimes")]
        trace!("Created VkDevice {:p}", device.handle());

        info!(
            "Preprocessing on {} (queue family {})",
            candidate.name, candidate.queue_family
        );
        Ok(Self {
            _entry: entry,
            instance,
            physical_device: candidate.physical_device,
            device,
            queue_family: candidate.queue_family,
            queue,
            name: candidate.name,
        })
    }

    /// Hands the device over to a [`GpuContext`] which destroys it once the last clone is gone
    pub fn into_context(self) -> Result<GpuContext> {
        GpuContext::from_headless(self)
    }

    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    pub fn queue(&self) -> vk::Queue {
        self.queue
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for HeadlessDevice {
    fn drop(&mut self) {
        #[cfg(feature = "log-lifetimes")]
        trace!("Destroying VkDevice {:p}", self.device.handle());

        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                tracing::error!("Failed to idle {} before destroying it: {}", self.name, e);
            }
            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_builder() {
        let settings = HeadlessSettings::default()
            .set_application_name("bake")
            .set_validation(true)
            .set_prefer_discrete(false);
        assert_eq!(settings.application_name, "bake");
        assert!(settings.validation);
        assert!(!settings.prefer_discrete);
    }

    #[test]
    #[ignore = "requires a Vulkan 1.3 driver"]
    fn test_create_headless_device() {
        let device = HeadlessDevice::new(&HeadlessSettings::default()).unwrap();
        assert!(!device.name().is_empty());
        let context = device.into_context().unwrap();
        assert_ne!(context.queue(), vk::Queue::null());
    }
}
