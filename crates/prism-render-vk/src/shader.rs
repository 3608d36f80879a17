// SPDX-License-Identifier: CEPL-1.0
use crate::descriptor::{DescriptorBinding, DescriptorType, SetLayout, StageSelection};
use crate::device::Device;
use anyhow::{Context, Result};
use ash::util::read_spv;
use ash::vk;
use std::ffi::CStr;
use std::io::Cursor;

const ENTRY: &CStr = c"main";

pub const PHONG_VERT: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/phong.vert.spv"));
pub const PHONG_FRAG: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/phong.frag.spv"));
pub const UNLIT_VERT: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/unlit.vert.spv"));
pub const UNLIT_FRAG: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/unlit.frag.spv"));

/// Set 0: camera and lights, one copy per frame in flight.
pub const GLOBAL_BINDINGS: [DescriptorBinding; 1] = [DescriptorBinding::new(
    DescriptorType::Uniform,
    StageSelection::VertexFragment,
)];

/// Set 1: material constants, diffuse map, specular map.
pub const MATERIAL_BINDINGS: [DescriptorBinding; 3] = [
    DescriptorBinding::new(DescriptorType::Uniform, StageSelection::VertexFragment),
    DescriptorBinding::new(DescriptorType::Sampler, StageSelection::Fragment),
    DescriptorBinding::new(DescriptorType::Sampler, StageSelection::Fragment),
];

/// Set layouts every shader in the engine is written against.
pub struct ShaderInterface {
    pub global: SetLayout,
    pub material: SetLayout,
}

impl ShaderInterface {
    pub fn new(device: &Device) -> Result<Self> {
        Ok(Self {
            global: SetLayout::new(device, &GLOBAL_BINDINGS)?,
            material: SetLayout::new(device, &MATERIAL_BINDINGS)?,
        })
    }

    /// In set-number order.
    pub fn set_layouts(&self) -> Vec<vk::DescriptorSetLayout> {
        vec![self.global.handle(), self.material.handle()]
    }
}

/// Vertex + fragment module pair.
pub struct Shader {
    device: ash::Device,
    vert: vk::ShaderModule,
    frag: vk::ShaderModule,
}

impl Shader {
    pub fn new(device: &Device, vert_spv: &[u8], frag_spv: &[u8]) -> Result<Self> {
        let vert_code = read_spv(&mut Cursor::new(vert_spv)).context("read_spv(vert)")?;
        let frag_code = read_spv(&mut Cursor::new(frag_spv)).context("read_spv(frag)")?;
        let mut out = Self {
            device: device.raw().clone(),
            vert: vk::ShaderModule::null(),
            frag: vk::ShaderModule::null(),
        };
        out.vert = device.create_shader_module(&vert_code)?;
        out.frag = device.create_shader_module(&frag_code)?;
        Ok(out)
    }

    pub fn phong(device: &Device) -> Result<Self> {
        Self::new(device, PHONG_VERT, PHONG_FRAG)
    }

    pub fn unlit(device: &Device) -> Result<Self> {
        Self::new(device, UNLIT_VERT, UNLIT_FRAG)
    }

    pub fn modules(&self) -> (vk::ShaderModule, vk::ShaderModule) {
        (self.vert, self.frag)
    }
}

pub fn stage_infos(
    vert: vk::ShaderModule,
    frag: vk::ShaderModule,
) -> [vk::PipelineShaderStageCreateInfo<'static>; 2] {
    [
        vk::PipelineShaderStageCreateInfo {
            s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
            stage: vk::ShaderStageFlags::VERTEX,
            module: vert,
            p_name: ENTRY.as_ptr(),
            ..Default::default()
        },
        vk::PipelineShaderStageCreateInfo {
            s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
            stage: vk::ShaderStageFlags::FRAGMENT,
            module: frag,
            p_name: ENTRY.as_ptr(),
            ..Default::default()
        },
    ]
}

impl Drop for Shader {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_shader_module(self.vert, None);
            self.device.destroy_shader_module(self.frag, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_spirv_is_word_aligned_and_tagged() {
        for bytes in [PHONG_VERT, PHONG_FRAG, UNLIT_VERT, UNLIT_FRAG] {
            let words = read_spv(&mut Cursor::new(bytes)).expect("valid spir-v");
            assert_eq!(words[0], 0x0723_0203);
        }
    }

    #[test]
    fn stages_are_vertex_then_fragment() {
        let s = stage_infos(vk::ShaderModule::null(), vk::ShaderModule::null());
        assert_eq!(s[0].stage, vk::ShaderStageFlags::VERTEX);
        assert_eq!(s[1].stage, vk::ShaderStageFlags::FRAGMENT);
        let name = unsafe { CStr::from_ptr(s[0].p_name) };
        assert_eq!(name, c"main");
    }

    #[test]
    fn material_set_has_two_fragment_samplers() {
        let samplers: Vec<_> = MATERIAL_BINDINGS
            .iter()
            .filter(|b| b.ty == DescriptorType::Sampler)
            .collect();
        assert_eq!(samplers.len(), 2);
        assert!(samplers.iter().all(|b| b.stages == StageSelection::Fragment));
    }
}
