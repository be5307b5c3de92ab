//! The guest-visible COM vtable surface (spec.md §4.6): every `extern
//! "win64"` entry point an activated image's IAT or a COM call-through can
//! actually reach, built on top of the object tables and pipeline
//! primitives the rest of `gfx` provides.
//!
//! Each interface follows spec.md §4.6's "multiple inheritance of COM
//! interfaces" convention: a `#[repr(C)]` struct whose first field is a
//! pointer to a static vtable of foreign-ABI function pointers. The object's
//! *state* (which resource/view/shader/state-block it wraps) lives in the
//! small struct behind that pointer, not in the `gfx` object tables — the
//! tables stay the single owner of the actual pixel/token/descriptor data,
//! while these wrappers are thin, refcounted guest handles onto a table
//! index. `query_interface` always hands back the same pointer (every
//! interface here is its own most-derived type; nothing implements a richer
//! one a caller could ask to step down to).

use std::ffi::c_void;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::hresult::{E_FAIL, E_INVALIDARG, E_POINTER, S_OK};
use crate::gfx::d3d11::resource::{BindFlags, Resource};
use crate::gfx::d3d11::sampler::{AddressMode, Sampler, SamplerDesc};
use crate::gfx::d3d11::shader::Shader;
use crate::gfx::d3d11::state::{BlendDesc, ComparisonFunc, CullMode, DepthStencilDesc, InputElement, InputLayout, RasterizerDesc, State, StateDesc};
use crate::gfx::d3d11::view::{View, ViewKind};
use crate::gfx::dxgi::{MemorySurface, SwapChain};
use crate::gfx::raster::{self, ColorTarget, DepthTarget, DepthTest, IndexFormat, ScreenVertex, VertexStage, Viewport, VsInput};
use crate::gfx::dxbc::sm4::Machine;
use crate::gfx::GfxState;
use crate::runtime::Runtime;

/// Guid placeholder — real `IID_*` comparisons are outside this core's
/// scope (spec.md §6's Non-goals exclude full COM registration); every
/// `QueryInterface` accepts whatever was asked for.
#[repr(C)]
pub struct Guid(pub u128);

// ---------------------------------------------------------------------
// IUnknown-shaped child objects: resources, views, shaders, state blocks,
// samplers. Each wraps one index into the matching `gfx` object table.
// ---------------------------------------------------------------------

#[repr(C)]
pub struct ChildObject {
    vtable: *const c_void,
    ref_count: AtomicU32,
    pub index: usize,
}

#[repr(C)]
pub struct ChildVtable {
    pub query_interface: extern "win64" fn(*mut ChildObject, *const Guid, *mut *mut c_void) -> i32,
    pub add_ref: extern "win64" fn(*mut ChildObject) -> u32,
    pub release: extern "win64" fn(*mut ChildObject) -> u32,
}

extern "win64" fn child_query_interface(this: *mut ChildObject, _riid: *const Guid, out: *mut *mut c_void) -> i32 {
    if out.is_null() {
        return E_POINTER;
    }
    unsafe {
        (*this).ref_count.fetch_add(1, Ordering::SeqCst);
        *out = this as *mut c_void;
    }
    S_OK
}

extern "win64" fn child_add_ref(this: *mut ChildObject) -> u32 {
    unsafe { (*this).ref_count.fetch_add(1, Ordering::SeqCst) + 1 }
}

/// Kinds of teardown a released child object triggers once its count hits
/// zero — removing its slot from the owning table.
#[derive(Copy, Clone)]
enum ChildKind {
    Resource,
    View,
    Shader,
    State,
    Sampler,
    InputLayout,
}

fn release_child(this: *mut ChildObject, kind: ChildKind) -> u32 {
    let remaining = unsafe { (*this).ref_count.fetch_sub(1, Ordering::SeqCst) - 1 };
    if remaining == 0 {
        let boxed = unsafe { Box::from_raw(this) };
        let rt = Runtime::get();
        let mut gfx = rt.gfx.inner.lock().unwrap();
        match kind {
            ChildKind::Resource => {
                gfx.resources.remove(boxed.index);
            }
            ChildKind::View => {
                gfx.views.remove(boxed.index);
            }
            ChildKind::Shader => {
                gfx.shaders.remove(boxed.index);
            }
            ChildKind::State => {
                gfx.states.remove(boxed.index);
            }
            ChildKind::Sampler => {
                gfx.samplers.remove(boxed.index);
            }
            ChildKind::InputLayout => {
                gfx.input_layouts.remove(boxed.index);
            }
        }
    }
    remaining
}

macro_rules! child_vtable {
    ($name:ident, $release_fn:ident, $kind:expr) => {
        extern "win64" fn $release_fn(this: *mut ChildObject) -> u32 {
            release_child(this, $kind)
        }
        static $name: ChildVtable = ChildVtable { query_interface: child_query_interface, add_ref: child_add_ref, release: $release_fn };
    };
}

child_vtable!(RESOURCE_VTABLE, resource_release, ChildKind::Resource);
child_vtable!(VIEW_VTABLE, view_release, ChildKind::View);
child_vtable!(SHADER_VTABLE, shader_release, ChildKind::Shader);
child_vtable!(STATE_VTABLE, state_release, ChildKind::State);
child_vtable!(SAMPLER_VTABLE, sampler_release, ChildKind::Sampler);
child_vtable!(INPUT_LAYOUT_VTABLE, input_layout_release, ChildKind::InputLayout);

fn wrap_child(vtable: &'static ChildVtable, index: usize) -> *mut ChildObject {
    Box::into_raw(Box::new(ChildObject { vtable: vtable as *const ChildVtable as *const c_void, ref_count: AtomicU32::new(1), index }))
}

fn child_index(obj: *mut ChildObject) -> usize {
    unsafe { (*obj).index }
}

// ---------------------------------------------------------------------
// Pipeline state the single immediate context tracks (spec.md §4.6's IA/
// VS/PS/OM/RS binding points).
// ---------------------------------------------------------------------

#[derive(Clone, Copy)]
pub struct BoundBuffer {
    pub resource: usize,
    pub stride: u32,
    pub offset: u32,
}

pub struct ContextState {
    pub vertex_buffer: Option<BoundBuffer>,
    pub index_buffer: Option<(usize, IndexFormat, u32)>,
    pub input_layout: Option<usize>,
    pub vertex_shader: Option<usize>,
    pub pixel_shader: Option<usize>,
    pub vs_constant_buffers: [Option<usize>; 4],
    pub ps_constant_buffers: [Option<usize>; 4],
    pub ps_shader_resources: [Option<usize>; 4],
    pub ps_samplers: [Option<usize>; 4],
    pub render_target: Option<usize>,
    pub depth_stencil_view: Option<usize>,
    pub viewport: Viewport,
    pub rasterizer_state: Option<usize>,
    pub depth_stencil_state: Option<usize>,
    pub blend_state: Option<usize>,
}

impl Default for ContextState {
    fn default() -> Self {
        ContextState {
            vertex_buffer: None,
            index_buffer: None,
            input_layout: None,
            vertex_shader: None,
            pixel_shader: None,
            vs_constant_buffers: [None; 4],
            ps_constant_buffers: [None; 4],
            ps_shader_resources: [None; 4],
            ps_samplers: [None; 4],
            render_target: None,
            depth_stencil_view: None,
            viewport: Viewport { x: 0.0, y: 0.0, width: 0.0, height: 0.0 },
            rasterizer_state: None,
            depth_stencil_state: None,
            blend_state: None,
        }
    }
}

// ---------------------------------------------------------------------
// ID3D11Device
// ---------------------------------------------------------------------

#[repr(C)]
pub struct DeviceObject {
    vtable: &'static DeviceVtable,
    ref_count: AtomicU32,
}

#[repr(C)]
pub struct DeviceVtable {
    pub query_interface: extern "win64" fn(*mut DeviceObject, *const Guid, *mut *mut c_void) -> i32,
    pub add_ref: extern "win64" fn(*mut DeviceObject) -> u32,
    pub release: extern "win64" fn(*mut DeviceObject) -> u32,
    pub create_buffer: extern "win64" fn(*mut DeviceObject, u32, u32, *const u8, *mut *mut ChildObject) -> i32,
    pub create_texture_2d: extern "win64" fn(*mut DeviceObject, u32, u32, u32, u32, *const u8, *mut *mut ChildObject) -> i32,
    pub create_vertex_shader: extern "win64" fn(*mut DeviceObject, *const u8, usize, *mut *mut ChildObject) -> i32,
    pub create_pixel_shader: extern "win64" fn(*mut DeviceObject, *const u8, usize, *mut *mut ChildObject) -> i32,
    pub create_input_layout: extern "win64" fn(*mut DeviceObject, *const RawInputElement, u32, *mut *mut ChildObject) -> i32,
    pub create_render_target_view: extern "win64" fn(*mut DeviceObject, *mut ChildObject, *mut *mut ChildObject) -> i32,
    pub create_shader_resource_view: extern "win64" fn(*mut DeviceObject, *mut ChildObject, *mut *mut ChildObject) -> i32,
    pub create_depth_stencil_view: extern "win64" fn(*mut DeviceObject, *mut ChildObject, *mut *mut ChildObject) -> i32,
    pub create_rasterizer_state: extern "win64" fn(*mut DeviceObject, u32, i32, *mut *mut ChildObject) -> i32,
    pub create_depth_stencil_state: extern "win64" fn(*mut DeviceObject, i32, i32, u32, *mut *mut ChildObject) -> i32,
    pub create_blend_state: extern "win64" fn(*mut DeviceObject, i32, *mut *mut ChildObject) -> i32,
    pub create_sampler_state: extern "win64" fn(*mut DeviceObject, u32, u32, *mut *mut ChildObject) -> i32,
    pub get_immediate_context: extern "win64" fn(*mut DeviceObject, *mut *mut ContextObject),
}

/// The trimmed `D3D11_INPUT_ELEMENT_DESC` this core reads off the guest:
/// semantic index, input slot, and byte offset — the fields [`InputElement`]
/// itself keeps. Element *order* in the array is the convention this core
/// uses to tell position/color/texcoord apart (spec.md §4.6 step 1's vertex
/// attributes), since the trimmed descriptor carries no semantic name.
#[repr(C)]
pub struct RawInputElement {
    pub semantic_index: u32,
    pub input_slot: u32,
    pub aligned_byte_offset: u32,
}

extern "win64" fn device_query_interface(this: *mut DeviceObject, _riid: *const Guid, out: *mut *mut c_void) -> i32 {
    if out.is_null() {
        return E_POINTER;
    }
    unsafe {
        (*this).ref_count.fetch_add(1, Ordering::SeqCst);
        *out = this as *mut c_void;
    }
    S_OK
}

extern "win64" fn device_add_ref(this: *mut DeviceObject) -> u32 {
    unsafe { (*this).ref_count.fetch_add(1, Ordering::SeqCst) + 1 }
}

extern "win64" fn device_release(this: *mut DeviceObject) -> u32 {
    let remaining = unsafe { (*this).ref_count.fetch_sub(1, Ordering::SeqCst) - 1 };
    if remaining == 0 {
        unsafe { drop(Box::from_raw(this)) };
    }
    remaining
}

extern "win64" fn create_buffer(_this: *mut DeviceObject, byte_width: u32, bind_flags: u32, initial_data: *const u8, out: *mut *mut ChildObject) -> i32 {
    if out.is_null() {
        return E_POINTER;
    }
    let initial = if initial_data.is_null() { None } else { Some(unsafe { std::slice::from_raw_parts(initial_data, byte_width as usize) }) };
    let resource = Resource::new_buffer(byte_width, BindFlags::from_bits_truncate(bind_flags), initial);
    let rt = Runtime::get();
    let mut gfx = rt.gfx.inner.lock().unwrap();
    match gfx.resources.insert(resource) {
        Some(index) => {
            unsafe { *out = wrap_child(&RESOURCE_VTABLE, index) };
            S_OK
        }
        None => E_FAIL,
    }
}

extern "win64" fn create_texture_2d(_this: *mut DeviceObject, width: u32, height: u32, bytes_per_pixel: u32, bind_flags: u32, initial_data: *const u8, out: *mut *mut ChildObject) -> i32 {
    if out.is_null() {
        return E_POINTER;
    }
    let size = (width * height * bytes_per_pixel) as usize;
    let initial = if initial_data.is_null() { None } else { Some(unsafe { std::slice::from_raw_parts(initial_data, size) }) };
    let resource = Resource::new_texture2d(width, height, bytes_per_pixel, BindFlags::from_bits_truncate(bind_flags), initial);
    let rt = Runtime::get();
    let mut gfx = rt.gfx.inner.lock().unwrap();
    match gfx.resources.insert(resource) {
        Some(index) => {
            unsafe { *out = wrap_child(&RESOURCE_VTABLE, index) };
            S_OK
        }
        None => E_FAIL,
    }
}

fn create_shader(dxbc_ptr: *const u8, dxbc_len: usize, out: *mut *mut ChildObject) -> i32 {
    if out.is_null() {
        return E_POINTER;
    }
    let dxbc = unsafe { std::slice::from_raw_parts(dxbc_ptr, dxbc_len) }.to_vec();
    match Shader::create(dxbc) {
        Ok(shader) => {
            let rt = Runtime::get();
            let mut gfx = rt.gfx.inner.lock().unwrap();
            match gfx.shaders.insert(shader) {
                Some(index) => {
                    unsafe { *out = wrap_child(&SHADER_VTABLE, index) };
                    S_OK
                }
                None => E_FAIL,
            }
        }
        Err(_) => E_INVALIDARG,
    }
}

extern "win64" fn create_vertex_shader(_this: *mut DeviceObject, dxbc: *const u8, len: usize, out: *mut *mut ChildObject) -> i32 {
    create_shader(dxbc, len, out)
}

extern "win64" fn create_pixel_shader(_this: *mut DeviceObject, dxbc: *const u8, len: usize, out: *mut *mut ChildObject) -> i32 {
    create_shader(dxbc, len, out)
}

extern "win64" fn create_input_layout(_this: *mut DeviceObject, elements: *const RawInputElement, count: u32, out: *mut *mut ChildObject) -> i32 {
    if out.is_null() || (count > 0 && elements.is_null()) {
        return E_POINTER;
    }
    let raw = unsafe { std::slice::from_raw_parts(elements, count as usize) };
    let elements: Vec<InputElement> = raw.iter().map(|e| InputElement { semantic_index: e.semantic_index, input_slot: e.input_slot, aligned_byte_offset: e.aligned_byte_offset }).collect();
    let rt = Runtime::get();
    let mut gfx = rt.gfx.inner.lock().unwrap();
    match gfx.input_layouts.insert(InputLayout::new(elements)) {
        Some(index) => {
            unsafe { *out = wrap_child(&INPUT_LAYOUT_VTABLE, index) };
            S_OK
        }
        None => E_FAIL,
    }
}

fn create_view(resource: *mut ChildObject, kind: ViewKind, out: *mut *mut ChildObject) -> i32 {
    if out.is_null() || resource.is_null() {
        return E_POINTER;
    }
    let resource_index = child_index(resource);
    let rt = Runtime::get();
    let mut gfx = rt.gfx.inner.lock().unwrap();
    match gfx.views.insert(View::new(kind, resource_index)) {
        Some(index) => {
            unsafe { *out = wrap_child(&VIEW_VTABLE, index) };
            S_OK
        }
        None => E_FAIL,
    }
}

extern "win64" fn create_render_target_view(_this: *mut DeviceObject, resource: *mut ChildObject, out: *mut *mut ChildObject) -> i32 {
    create_view(resource, ViewKind::RenderTarget, out)
}

extern "win64" fn create_shader_resource_view(_this: *mut DeviceObject, resource: *mut ChildObject, out: *mut *mut ChildObject) -> i32 {
    create_view(resource, ViewKind::ShaderResource, out)
}

extern "win64" fn create_depth_stencil_view(_this: *mut DeviceObject, resource: *mut ChildObject, out: *mut *mut ChildObject) -> i32 {
    create_view(resource, ViewKind::DepthStencil, out)
}

fn cull_mode_from_d3d(value: u32) -> CullMode {
    match value {
        2 => CullMode::Front,
        3 => CullMode::Back,
        _ => CullMode::None,
    }
}

extern "win64" fn create_rasterizer_state(_this: *mut DeviceObject, cull_mode: u32, front_counter_clockwise: i32, out: *mut *mut ChildObject) -> i32 {
    if out.is_null() {
        return E_POINTER;
    }
    let desc = RasterizerDesc { cull_mode: cull_mode_from_d3d(cull_mode), front_counter_clockwise: front_counter_clockwise != 0 };
    let rt = Runtime::get();
    let mut gfx = rt.gfx.inner.lock().unwrap();
    match gfx.states.insert(State::new(StateDesc::Rasterizer(desc))) {
        Some(index) => {
            unsafe { *out = wrap_child(&STATE_VTABLE, index) };
            S_OK
        }
        None => E_FAIL,
    }
}

fn comparison_func_from_d3d(value: u32) -> ComparisonFunc {
    match value {
        1 => ComparisonFunc::Never,
        2 => ComparisonFunc::Less,
        3 => ComparisonFunc::Equal,
        4 => ComparisonFunc::LessEqual,
        5 => ComparisonFunc::Greater,
        6 => ComparisonFunc::NotEqual,
        7 => ComparisonFunc::GreaterEqual,
        _ => ComparisonFunc::Always,
    }
}

extern "win64" fn create_depth_stencil_state(_this: *mut DeviceObject, depth_enable: i32, depth_write: i32, depth_func: u32, out: *mut *mut ChildObject) -> i32 {
    if out.is_null() {
        return E_POINTER;
    }
    let desc = DepthStencilDesc { depth_enable: depth_enable != 0, depth_write_mask: depth_write != 0, depth_func: comparison_func_from_d3d(depth_func) };
    let rt = Runtime::get();
    let mut gfx = rt.gfx.inner.lock().unwrap();
    match gfx.states.insert(State::new(StateDesc::DepthStencil(desc))) {
        Some(index) => {
            unsafe { *out = wrap_child(&STATE_VTABLE, index) };
            S_OK
        }
        None => E_FAIL,
    }
}

extern "win64" fn create_blend_state(_this: *mut DeviceObject, blend_enable: i32, out: *mut *mut ChildObject) -> i32 {
    if out.is_null() {
        return E_POINTER;
    }
    let desc = BlendDesc { blend_enable: blend_enable != 0 };
    let rt = Runtime::get();
    let mut gfx = rt.gfx.inner.lock().unwrap();
    match gfx.states.insert(State::new(StateDesc::Blend(desc))) {
        Some(index) => {
            unsafe { *out = wrap_child(&STATE_VTABLE, index) };
            S_OK
        }
        None => E_FAIL,
    }
}

fn address_mode_from_d3d(value: u32) -> AddressMode {
    match value {
        1 => AddressMode::Wrap,
        3 => AddressMode::Mirror,
        _ => AddressMode::Clamp,
    }
}

extern "win64" fn create_sampler_state(_this: *mut DeviceObject, address_u: u32, address_v: u32, out: *mut *mut ChildObject) -> i32 {
    if out.is_null() {
        return E_POINTER;
    }
    let desc = SamplerDesc { address_u: address_mode_from_d3d(address_u), address_v: address_mode_from_d3d(address_v) };
    let rt = Runtime::get();
    let mut gfx = rt.gfx.inner.lock().unwrap();
    match gfx.samplers.insert(Sampler::new(desc)) {
        Some(index) => {
            unsafe { *out = wrap_child(&SAMPLER_VTABLE, index) };
            S_OK
        }
        None => E_FAIL,
    }
}

extern "win64" fn get_immediate_context(_this: *mut DeviceObject, out: *mut *mut ContextObject) {
    if out.is_null() {
        return;
    }
    unsafe { *out = Box::into_raw(Box::new(ContextObject { vtable: &CONTEXT_VTABLE, ref_count: AtomicU32::new(1) })) };
}

static DEVICE_VTABLE: DeviceVtable = DeviceVtable {
    query_interface: device_query_interface,
    add_ref: device_add_ref,
    release: device_release,
    create_buffer,
    create_texture_2d,
    create_vertex_shader,
    create_pixel_shader,
    create_input_layout,
    create_render_target_view,
    create_shader_resource_view,
    create_depth_stencil_view,
    create_rasterizer_state,
    create_depth_stencil_state,
    create_blend_state,
    create_sampler_state,
    get_immediate_context,
};

// ---------------------------------------------------------------------
// ID3D11DeviceContext
// ---------------------------------------------------------------------

#[repr(C)]
pub struct ContextObject {
    vtable: &'static ContextVtable,
    ref_count: AtomicU32,
}

#[repr(C)]
pub struct ContextVtable {
    pub query_interface: extern "win64" fn(*mut ContextObject, *const Guid, *mut *mut c_void) -> i32,
    pub add_ref: extern "win64" fn(*mut ContextObject) -> u32,
    pub release: extern "win64" fn(*mut ContextObject) -> u32,
    pub ia_set_vertex_buffers: extern "win64" fn(*mut ContextObject, *mut ChildObject, u32, u32),
    pub ia_set_index_buffer: extern "win64" fn(*mut ContextObject, *mut ChildObject, u32, u32),
    pub ia_set_input_layout: extern "win64" fn(*mut ContextObject, *mut ChildObject),
    pub vs_set_shader: extern "win64" fn(*mut ContextObject, *mut ChildObject),
    pub vs_set_constant_buffers: extern "win64" fn(*mut ContextObject, u32, *mut ChildObject),
    pub ps_set_shader: extern "win64" fn(*mut ContextObject, *mut ChildObject),
    pub ps_set_constant_buffers: extern "win64" fn(*mut ContextObject, u32, *mut ChildObject),
    pub ps_set_shader_resources: extern "win64" fn(*mut ContextObject, u32, *mut ChildObject),
    pub ps_set_samplers: extern "win64" fn(*mut ContextObject, u32, *mut ChildObject),
    pub rs_set_viewports: extern "win64" fn(*mut ContextObject, f32, f32, f32, f32),
    pub rs_set_state: extern "win64" fn(*mut ContextObject, *mut ChildObject),
    pub om_set_render_targets: extern "win64" fn(*mut ContextObject, *mut ChildObject, *mut ChildObject),
    pub om_set_depth_stencil_state: extern "win64" fn(*mut ContextObject, *mut ChildObject),
    pub om_set_blend_state: extern "win64" fn(*mut ContextObject, *mut ChildObject),
    pub clear_render_target_view: extern "win64" fn(*mut ContextObject, *mut ChildObject, *const f32),
    pub clear_depth_stencil_view: extern "win64" fn(*mut ContextObject, *mut ChildObject, f32),
    pub map: extern "win64" fn(*mut ContextObject, *mut ChildObject, *mut *mut u8, *mut u32) -> i32,
    pub unmap: extern "win64" fn(*mut ContextObject, *mut ChildObject),
    pub draw: extern "win64" fn(*mut ContextObject, u32, u32),
    pub draw_indexed: extern "win64" fn(*mut ContextObject, u32, u32, i32),
}

extern "win64" fn context_query_interface(this: *mut ContextObject, _riid: *const Guid, out: *mut *mut c_void) -> i32 {
    if out.is_null() {
        return E_POINTER;
    }
    unsafe {
        (*this).ref_count.fetch_add(1, Ordering::SeqCst);
        *out = this as *mut c_void;
    }
    S_OK
}

extern "win64" fn context_add_ref(this: *mut ContextObject) -> u32 {
    unsafe { (*this).ref_count.fetch_add(1, Ordering::SeqCst) + 1 }
}

extern "win64" fn context_release(this: *mut ContextObject) -> u32 {
    let remaining = unsafe { (*this).ref_count.fetch_sub(1, Ordering::SeqCst) - 1 };
    if remaining == 0 {
        unsafe { drop(Box::from_raw(this)) };
    }
    remaining
}

fn maybe_index(ptr: *mut ChildObject) -> Option<usize> {
    if ptr.is_null() {
        None
    } else {
        Some(child_index(ptr))
    }
}

extern "win64" fn ia_set_vertex_buffers(_this: *mut ContextObject, buffer: *mut ChildObject, stride: u32, offset: u32) {
    let rt = Runtime::get();
    let mut gfx = rt.gfx.inner.lock().unwrap();
    gfx.context.vertex_buffer = maybe_index(buffer).map(|resource| BoundBuffer { resource, stride, offset });
}

extern "win64" fn ia_set_index_buffer(_this: *mut ContextObject, buffer: *mut ChildObject, format: u32, offset: u32) {
    let rt = Runtime::get();
    let mut gfx = rt.gfx.inner.lock().unwrap();
    let index_format = if format == 57 { IndexFormat::U32 } else { IndexFormat::U16 };
    gfx.context.index_buffer = maybe_index(buffer).map(|resource| (resource, index_format, offset));
}

extern "win64" fn ia_set_input_layout(_this: *mut ContextObject, layout: *mut ChildObject) {
    let rt = Runtime::get();
    rt.gfx.inner.lock().unwrap().context.input_layout = maybe_index(layout);
}

extern "win64" fn vs_set_shader(_this: *mut ContextObject, shader: *mut ChildObject) {
    let rt = Runtime::get();
    rt.gfx.inner.lock().unwrap().context.vertex_shader = maybe_index(shader);
}

extern "win64" fn vs_set_constant_buffers(_this: *mut ContextObject, slot: u32, buffer: *mut ChildObject) {
    let rt = Runtime::get();
    let mut gfx = rt.gfx.inner.lock().unwrap();
    if let Some(cb) = gfx.context.vs_constant_buffers.get_mut(slot as usize) {
        *cb = maybe_index(buffer);
    }
}

extern "win64" fn ps_set_shader(_this: *mut ContextObject, shader: *mut ChildObject) {
    let rt = Runtime::get();
    rt.gfx.inner.lock().unwrap().context.pixel_shader = maybe_index(shader);
}

extern "win64" fn ps_set_constant_buffers(_this: *mut ContextObject, slot: u32, buffer: *mut ChildObject) {
    let rt = Runtime::get();
    let mut gfx = rt.gfx.inner.lock().unwrap();
    if let Some(cb) = gfx.context.ps_constant_buffers.get_mut(slot as usize) {
        *cb = maybe_index(buffer);
    }
}

extern "win64" fn ps_set_shader_resources(_this: *mut ContextObject, slot: u32, view: *mut ChildObject) {
    let rt = Runtime::get();
    let mut gfx = rt.gfx.inner.lock().unwrap();
    if let Some(srv) = gfx.context.ps_shader_resources.get_mut(slot as usize) {
        *srv = maybe_index(view);
    }
}

extern "win64" fn ps_set_samplers(_this: *mut ContextObject, slot: u32, sampler: *mut ChildObject) {
    let rt = Runtime::get();
    let mut gfx = rt.gfx.inner.lock().unwrap();
    if let Some(s) = gfx.context.ps_samplers.get_mut(slot as usize) {
        *s = maybe_index(sampler);
    }
}

extern "win64" fn rs_set_viewports(_this: *mut ContextObject, x: f32, y: f32, width: f32, height: f32) {
    let rt = Runtime::get();
    rt.gfx.inner.lock().unwrap().context.viewport = Viewport { x, y, width, height };
}

extern "win64" fn rs_set_state(_this: *mut ContextObject, state: *mut ChildObject) {
    let rt = Runtime::get();
    rt.gfx.inner.lock().unwrap().context.rasterizer_state = maybe_index(state);
}

extern "win64" fn om_set_render_targets(_this: *mut ContextObject, rtv: *mut ChildObject, dsv: *mut ChildObject) {
    let rt = Runtime::get();
    let mut gfx = rt.gfx.inner.lock().unwrap();
    gfx.context.render_target = maybe_index(rtv);
    gfx.context.depth_stencil_view = maybe_index(dsv);
}

extern "win64" fn om_set_depth_stencil_state(_this: *mut ContextObject, state: *mut ChildObject) {
    let rt = Runtime::get();
    rt.gfx.inner.lock().unwrap().context.depth_stencil_state = maybe_index(state);
}

extern "win64" fn om_set_blend_state(_this: *mut ContextObject, state: *mut ChildObject) {
    let rt = Runtime::get();
    rt.gfx.inner.lock().unwrap().context.blend_state = maybe_index(state);
}

extern "win64" fn clear_render_target_view(_this: *mut ContextObject, view: *mut ChildObject, rgba: *const f32) {
    let Some(view_index) = maybe_index(view) else { return };
    let color = if rgba.is_null() { [0.0; 4] } else { unsafe { std::slice::from_raw_parts(rgba, 4).try_into().unwrap() } };
    let rt = Runtime::get();
    let mut gfx = rt.gfx.inner.lock().unwrap();
    let Some(resource_index) = gfx.views.get(view_index).map(|v| v.resource_index) else { return };
    let Some(resource) = gfx.resources.get_mut(resource_index) else { return };
    for pixel in resource.data.chunks_exact_mut(4) {
        for (i, channel) in color.iter().enumerate() {
            pixel[i] = (channel.clamp(0.0, 1.0) * 255.0).round() as u8;
        }
    }
}

extern "win64" fn clear_depth_stencil_view(_this: *mut ContextObject, view: *mut ChildObject, depth: f32) {
    let Some(view_index) = maybe_index(view) else { return };
    let rt = Runtime::get();
    let mut gfx = rt.gfx.inner.lock().unwrap();
    let Some(resource_index) = gfx.views.get(view_index).map(|v| v.resource_index) else { return };
    let Some(resource) = gfx.resources.get_mut(resource_index) else { return };
    for texel in resource.data.chunks_exact_mut(4) {
        texel.copy_from_slice(&depth.to_le_bytes());
    }
}

/// `Map` with `D3D11_MAP_WRITE_DISCARD` semantics — this core never
/// distinguishes discard/no-overwrite, since it has no GPU pipeline to
/// race against (spec.md §4.6's resource-table notes).
extern "win64" fn map(_this: *mut ContextObject, resource: *mut ChildObject, out_ptr: *mut *mut u8, out_pitch: *mut u32) -> i32 {
    let Some(index) = maybe_index(resource) else { return E_INVALIDARG };
    let rt = Runtime::get();
    let mut gfx = rt.gfx.inner.lock().unwrap();
    let Some(resource) = gfx.resources.get_mut(index) else { return E_INVALIDARG };
    if !out_ptr.is_null() {
        unsafe { *out_ptr = resource.data.as_mut_ptr() };
    }
    if !out_pitch.is_null() {
        unsafe { *out_pitch = resource.row_pitch };
    }
    S_OK
}

extern "win64" fn unmap(_this: *mut ContextObject, _resource: *mut ChildObject) {}

/// Assembles one vertex's fixed-function inputs out of the bound vertex
/// buffer, using element order as the position/color/texcoord convention
/// [`RawInputElement`] documents.
fn fetch_vertex(data: &[u8], stride: u32, index: u32, elements: &[InputElement]) -> VsInput {
    let base = (index * stride) as usize;
    let read = |offset: u32, n: usize| -> [f32; 4] {
        let start = base + offset as usize;
        let mut out = [0.0f32; 4];
        for i in 0..n {
            let b = start + i * 4;
            if b + 4 <= data.len() {
                out[i] = f32::from_le_bytes(data[b..b + 4].try_into().unwrap());
            }
        }
        out
    };
    let position = elements.first().map(|e| read(e.aligned_byte_offset, 3)).unwrap_or([0.0; 4]);
    let color = elements.get(1).map(|e| read(e.aligned_byte_offset, 4)).unwrap_or([1.0; 4]);
    let texcoord = elements.get(2).map(|e| read(e.aligned_byte_offset, 2)).unwrap_or([0.0; 4]);
    VsInput { position: [position[0], position[1], position[2]], color, texcoord: [texcoord[0], texcoord[1]] }
}

/// Runs the full IA->VS->clip->raster->PS pipeline for one triangle list
/// draw call (spec.md §4.6 steps 1-8), resolved against whatever the
/// context currently has bound.
fn draw_triangles(gfx: &mut GfxState, vertex_indices: &[u32]) {
    let Some(vb) = gfx.context.vertex_buffer else { return };
    let Some(rt_index) = gfx.context.render_target else { return };
    let Some(rtv_resource) = gfx.views.get(rt_index).map(|v| v.resource_index) else { return };
    let Some((rt_width, rt_height, rt_row_pitch)) = gfx.resources.get(rtv_resource).map(|r| (r.width, r.height, r.row_pitch)) else { return };

    let elements: Vec<InputElement> = gfx.context.input_layout.and_then(|i| gfx.input_layouts.get(i)).map(|l| l.elements.clone()).unwrap_or_default();

    let vb_data = match gfx.resources.get(vb.resource) {
        Some(r) => r.data.clone(),
        None => return,
    };

    let vs_program = gfx.context.vertex_shader.and_then(|i| gfx.shaders.get(i)).map(|s| s.parsed.clone());
    let vs_constant_buffers: Vec<Option<Vec<u8>>> = gfx.context.vs_constant_buffers.iter().map(|slot| slot.and_then(|i| gfx.resources.get(i)).map(|r| r.data.clone())).collect();
    let ps_program = gfx.context.pixel_shader.and_then(|i| gfx.shaders.get(i)).map(|s| s.parsed.clone());
    let ps_constant_buffers: Vec<Option<Vec<u8>>> = gfx.context.ps_constant_buffers.iter().map(|slot| slot.and_then(|i| gfx.resources.get(i)).map(|r| r.data.clone())).collect();

    let texture = gfx.context.ps_shader_resources[0].and_then(|i| gfx.views.get(i)).and_then(|v| gfx.resources.get(v.resource_index)).map(|r| (r.data.clone(), r.width, r.height, r.row_pitch));
    let sampler = gfx.context.ps_samplers[0].and_then(|i| gfx.samplers.get(i)).map(|s| (s.desc.address_u, s.desc.address_v));

    let cull_mode = gfx.context.rasterizer_state.and_then(|i| gfx.states.get(i)).map(|s| match &s.desc {
        StateDesc::Rasterizer(d) => d.cull_mode,
        _ => CullMode::None,
    });
    let front_ccw = gfx.context.rasterizer_state.and_then(|i| gfx.states.get(i)).map(|s| match &s.desc {
        StateDesc::Rasterizer(d) => d.front_counter_clockwise,
        _ => false,
    });
    let depth_test = gfx.context.depth_stencil_state.and_then(|i| gfx.states.get(i)).map(|s| match &s.desc {
        StateDesc::DepthStencil(d) => DepthTest { enabled: d.depth_enable, write_enabled: d.depth_write_mask, func: d.depth_func },
        _ => DepthTest::default(),
    });

    let viewport = gfx.context.viewport;
    let depth_stencil_resource = gfx.context.depth_stencil_view.and_then(|i| gfx.views.get(i)).map(|v| v.resource_index);
    let depth_info = depth_stencil_resource.and_then(|idx| gfx.resources.get(idx).map(|r| (idx, r.width, r.data.clone())));

    let mut screen_vertices = [ScreenVertex { x: 0.0, y: 0.0, z: 0.0, color: [0.0; 4], texcoord: [0.0; 2] }; 3];
    for (slot, &index) in vertex_indices.iter().enumerate() {
        let input = fetch_vertex(&vb_data, vb.stride, index, &elements);
        let stage = match &vs_program {
            Some(program) => {
                let cbs: [Option<&[u8]>; 4] = std::array::from_fn(|i| vs_constant_buffers.get(i).and_then(|o| o.as_deref()));
                VertexStage::Shader { program, constant_buffers: cbs }
            }
            None => VertexStage::FixedFunction { matrix: vs_constant_buffers[0].as_ref().and_then(matrix_from_bytes) },
        };
        let vs_out = raster::run_vertex_stage(&input, &stage);
        let ndc = raster::perspective_divide(vs_out.clip_position);
        let (x, y, z) = raster::ndc_to_screen(ndc, viewport);
        screen_vertices[slot] = ScreenVertex { x, y, z, color: vs_out.color, texcoord: vs_out.texcoord };
    }

    // Pixel data is copied out of the resource table and rasterized against
    // owned local buffers, then written back once — the color and depth
    // targets may alias the same resource table (or each other, in the
    // degenerate case of rendering into the depth view's own resource), so
    // holding two live table borrows across the rasterize call is avoided
    // entirely rather than threaded through split-borrow bookkeeping.
    let Some(mut color_bytes) = gfx.resources.get(rtv_resource).map(|r| r.data.clone()) else { return };
    let mut color_target = ColorTarget { pixels: &mut color_bytes, width: rt_width, height: rt_height, row_pitch: rt_row_pitch };

    let shade = |color: [f32; 4], texcoord: [f32; 2]| -> [f32; 4] {
        if let Some(program) = &ps_program {
            let mut machine = Machine::new(program.temp_count);
            machine.inputs[0] = color;
            machine.inputs[1] = [texcoord[0], texcoord[1], 0.0, 0.0];
            let cbs: [Option<&[u8]>; 4] = std::array::from_fn(|i| ps_constant_buffers.get(i).and_then(|o| o.as_deref()));
            machine.constant_buffers = cbs;
            machine.run(&program.tokens);
            machine.outputs[0]
        } else if let (Some((data, w, h, pitch)), Some((au, av))) = (&texture, sampler) {
            let sampled = raster::sample_texture(data, *w, *h, *pitch, texcoord[0], texcoord[1], au, av);
            [color[0] * sampled[0], color[1] * sampled[1], color[2] * sampled[2], color[3] * sampled[3]]
        } else {
            color
        }
    };

    match depth_info {
        Some((depth_index, depth_width, depth_bytes)) => {
            let mut depth_texels: Vec<f32> = depth_bytes.chunks_exact(4).map(|c| f32::from_le_bytes(c.try_into().unwrap())).collect();
            let mut depth_target = DepthTarget { texels: &mut depth_texels, width: depth_width };
            raster::rasterize_triangle(screen_vertices, cull_mode.unwrap_or(CullMode::None), front_ccw.unwrap_or(false), &mut color_target, Some(&mut depth_target), depth_test.unwrap_or_default(), shade);
            if let Some(depth_resource) = gfx.resources.get_mut(depth_index) {
                for (chunk, value) in depth_resource.data.chunks_exact_mut(4).zip(depth_texels.iter()) {
                    chunk.copy_from_slice(&value.to_le_bytes());
                }
            }
        }
        None => {
            raster::rasterize_triangle(screen_vertices, cull_mode.unwrap_or(CullMode::None), front_ccw.unwrap_or(false), &mut color_target, None, depth_test.unwrap_or_default(), shade);
        }
    }

    if let Some(rtv) = gfx.resources.get_mut(rtv_resource) {
        rtv.data = color_bytes;
    }
}

fn matrix_from_bytes(bytes: &Vec<u8>) -> Option<[[f32; 4]; 4]> {
    if bytes.len() < 64 {
        return None;
    }
    let mut matrix = [[0.0f32; 4]; 4];
    for row in 0..4 {
        for col in 0..4 {
            let offset = (row * 4 + col) * 4;
            matrix[row][col] = f32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap());
        }
    }
    Some(matrix)
}

/// `Draw(vertex_count, start_vertex_location)`. Only the triangle-list
/// topology is modeled (spec.md §6's Non-goals exclude the rest), so
/// vertices are grouped in threes.
extern "win64" fn draw(_this: *mut ContextObject, vertex_count: u32, start_vertex_location: u32) {
    let rt = Runtime::get();
    let mut gfx = rt.gfx.inner.lock().unwrap();
    let mut i = 0u32;
    while i + 3 <= vertex_count {
        let base = start_vertex_location + i;
        draw_triangles(&mut gfx, &[base, base + 1, base + 2]);
        i += 3;
    }
}

extern "win64" fn draw_indexed(_this: *mut ContextObject, index_count: u32, start_index_location: u32, base_vertex_location: i32) {
    let rt = Runtime::get();
    let mut gfx = rt.gfx.inner.lock().unwrap();
    let Some((ib_resource, format, _offset)) = gfx.context.index_buffer else { return };
    let Some(ib_data) = gfx.resources.get(ib_resource).map(|r| r.data.clone()) else { return };

    let mut i = 0u32;
    while i + 3 <= index_count {
        let mut triangle = [0u32; 3];
        for (k, slot) in triangle.iter_mut().enumerate() {
            let idx = (start_index_location + i + k as u32) as usize;
            *slot = raster::read_index(&ib_data, idx, format, base_vertex_location);
        }
        draw_triangles(&mut gfx, &triangle);
        i += 3;
    }
}

static CONTEXT_VTABLE: ContextVtable = ContextVtable {
    query_interface: context_query_interface,
    add_ref: context_add_ref,
    release: context_release,
    ia_set_vertex_buffers,
    ia_set_index_buffer,
    ia_set_input_layout,
    vs_set_shader,
    vs_set_constant_buffers,
    ps_set_shader,
    ps_set_constant_buffers,
    ps_set_shader_resources,
    ps_set_samplers,
    rs_set_viewports,
    rs_set_state,
    om_set_render_targets,
    om_set_depth_stencil_state,
    om_set_blend_state,
    clear_render_target_view,
    clear_depth_stencil_view,
    map,
    unmap,
    draw,
    draw_indexed,
};

// ---------------------------------------------------------------------
// IDXGISwapChain / IDXGIFactory, and the D3D11CreateDeviceAndSwapChain
// entry point that assembles all four.
// ---------------------------------------------------------------------

#[repr(C)]
pub struct SwapChainObject {
    vtable: &'static SwapChainVtable,
    ref_count: AtomicU32,
}

#[repr(C)]
pub struct SwapChainVtable {
    pub query_interface: extern "win64" fn(*mut SwapChainObject, *const Guid, *mut *mut c_void) -> i32,
    pub add_ref: extern "win64" fn(*mut SwapChainObject) -> u32,
    pub release: extern "win64" fn(*mut SwapChainObject) -> u32,
    pub get_buffer: extern "win64" fn(*mut SwapChainObject, *mut *mut ChildObject) -> i32,
    pub present: extern "win64" fn(*mut SwapChainObject, u32, u32) -> i32,
    pub resize_buffers: extern "win64" fn(*mut SwapChainObject, u32, u32) -> i32,
}

extern "win64" fn swap_chain_query_interface(this: *mut SwapChainObject, _riid: *const Guid, out: *mut *mut c_void) -> i32 {
    if out.is_null() {
        return E_POINTER;
    }
    unsafe {
        (*this).ref_count.fetch_add(1, Ordering::SeqCst);
        *out = this as *mut c_void;
    }
    S_OK
}

extern "win64" fn swap_chain_add_ref(this: *mut SwapChainObject) -> u32 {
    unsafe { (*this).ref_count.fetch_add(1, Ordering::SeqCst) + 1 }
}

extern "win64" fn swap_chain_release(this: *mut SwapChainObject) -> u32 {
    let remaining = unsafe { (*this).ref_count.fetch_sub(1, Ordering::SeqCst) - 1 };
    if remaining == 0 {
        unsafe { drop(Box::from_raw(this)) };
    }
    remaining
}

/// `GetBuffer`. Hands back a non-owning resource wrapper over the swap
/// chain's back-buffer, mirrored into the resource table the first time
/// it's requested (spec.md §4.6's `GetBuffer` note on non-owning refs).
extern "win64" fn swap_chain_get_buffer(_this: *mut SwapChainObject, out: *mut *mut ChildObject) -> i32 {
    if out.is_null() {
        return E_POINTER;
    }
    let rt = Runtime::get();
    let mut gfx = rt.gfx.inner.lock().unwrap();
    let Some(swap_chain) = &gfx.swap_chain else { return E_FAIL };
    let (width, height) = (swap_chain.width, swap_chain.height);
    let data = swap_chain.back_buffer.clone();
    let mut resource = Resource::new_texture2d(width, height, 4, BindFlags::RENDER_TARGET, Some(&data));
    resource.non_owning = true;
    match gfx.resources.insert(resource) {
        Some(index) => {
            unsafe { *out = wrap_child(&RESOURCE_VTABLE, index) };
            S_OK
        }
        None => E_FAIL,
    }
}

/// `Present(sync_interval, flags)`. Copies the render-target resource's
/// current bytes into the swap chain's back buffer then hands it to the
/// attached [`crate::gfx::dxgi::PresentSurface`].
extern "win64" fn swap_chain_present(_this: *mut SwapChainObject, _sync_interval: u32, _flags: u32) -> i32 {
    let rt = Runtime::get();
    let mut gfx = rt.gfx.inner.lock().unwrap();
    let Some(rt_index) = gfx.context.render_target else { return S_OK };
    let Some(resource_index) = gfx.views.get(rt_index).map(|v| v.resource_index) else { return S_OK };
    let Some(bytes) = gfx.resources.get(resource_index).map(|r| r.data.clone()) else { return S_OK };
    let Some(swap_chain) = &mut gfx.swap_chain else { return S_OK };
    let n = bytes.len().min(swap_chain.back_buffer.len());
    swap_chain.back_buffer[..n].copy_from_slice(&bytes[..n]);
    let mut surface = MemorySurface::new(swap_chain.width, swap_chain.height);
    swap_chain.present(&mut surface);
    S_OK
}

extern "win64" fn swap_chain_resize_buffers(_this: *mut SwapChainObject, width: u32, height: u32) -> i32 {
    let rt = Runtime::get();
    let mut gfx = rt.gfx.inner.lock().unwrap();
    let surface = MemorySurface::new(width, height);
    gfx.swap_chain = Some(SwapChain::new(width, height, &surface));
    S_OK
}

static SWAP_CHAIN_VTABLE: SwapChainVtable =
    SwapChainVtable { query_interface: swap_chain_query_interface, add_ref: swap_chain_add_ref, release: swap_chain_release, get_buffer: swap_chain_get_buffer, present: swap_chain_present, resize_buffers: swap_chain_resize_buffers };

/// `D3D11CreateDeviceAndSwapChain`. This core always succeeds, ignores the
/// driver-type/feature-level/adapter arguments (spec.md §6's Non-goals
/// exclude adapter enumeration — there is exactly one, this one), and
/// allocates the swap chain's back-buffer at the requested dimensions,
/// falling back to a default window size when either is zero.
pub extern "win64" fn d3d11_create_device_and_swap_chain(
    _adapter: u64,
    _driver_type: u32,
    _software: u64,
    _flags: u32,
    _feature_levels: *const u32,
    _feature_level_count: u32,
    _sdk_version: u32,
    swap_chain_width: u32,
    swap_chain_height: u32,
    out_swap_chain: *mut *mut SwapChainObject,
    out_device: *mut *mut DeviceObject,
    out_feature_level: *mut u32,
    out_context: *mut *mut ContextObject,
) -> i32 {
    let rt = Runtime::get();
    let mut gfx = rt.gfx.inner.lock().unwrap();
    let surface = MemorySurface::new(640, 480);
    gfx.swap_chain = Some(SwapChain::new(swap_chain_width, swap_chain_height, &surface));
    drop(gfx);

    if !out_swap_chain.is_null() {
        unsafe { *out_swap_chain = Box::into_raw(Box::new(SwapChainObject { vtable: &SWAP_CHAIN_VTABLE, ref_count: AtomicU32::new(1) })) };
    }
    if !out_device.is_null() {
        unsafe { *out_device = Box::into_raw(Box::new(DeviceObject { vtable: &DEVICE_VTABLE, ref_count: AtomicU32::new(1) })) };
    }
    if !out_context.is_null() {
        unsafe { *out_context = Box::into_raw(Box::new(ContextObject { vtable: &CONTEXT_VTABLE, ref_count: AtomicU32::new(1) })) };
    }
    if !out_feature_level.is_null() {
        const D3D_FEATURE_LEVEL_11_0: u32 = 0xb000;
        unsafe { *out_feature_level = D3D_FEATURE_LEVEL_11_0 };
    }
    S_OK
}

pub fn stub_table() -> Vec<(&'static str, &'static str, usize)> {
    vec![("d3d11.dll", "D3D11CreateDeviceAndSwapChain", d3d11_create_device_and_swap_chain as usize)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::init_for_test;

    #[test]
    fn create_device_and_swap_chain_populates_all_four_outputs() {
        init_for_test();
        let mut swap_chain: *mut SwapChainObject = std::ptr::null_mut();
        let mut device: *mut DeviceObject = std::ptr::null_mut();
        let mut context: *mut ContextObject = std::ptr::null_mut();
        let mut feature_level = 0u32;
        let rc = d3d11_create_device_and_swap_chain(0, 0, 0, 0, std::ptr::null(), 0, 0, 640, 480, &mut swap_chain, &mut device, &mut feature_level, &mut context);
        assert_eq!(rc, S_OK);
        assert!(!swap_chain.is_null());
        assert!(!device.is_null());
        assert!(!context.is_null());
        assert_ne!(feature_level, 0);
    }

    #[test]
    fn create_buffer_then_release_frees_the_resource_table_slot() {
        init_for_test();
        let device = Box::into_raw(Box::new(DeviceObject { vtable: &DEVICE_VTABLE, ref_count: AtomicU32::new(1) }));
        let mut child: *mut ChildObject = std::ptr::null_mut();
        let rc = create_buffer(device, 64, BindFlags::VERTEX_BUFFER.bits(), std::ptr::null(), &mut child);
        assert_eq!(rc, S_OK);
        assert!(!child.is_null());

        let rt = Runtime::get();
        let index = child_index(child);
        assert!(rt.gfx.inner.lock().unwrap().resources.get(index).is_some());

        assert_eq!(release_child(child, ChildKind::Resource), 0);
        assert!(rt.gfx.inner.lock().unwrap().resources.get(index).is_none());
        unsafe { drop(Box::from_raw(device)) };
    }

    #[test]
    fn draw_one_triangle_with_fixed_function_pipeline_writes_the_center_pixel() {
        init_for_test();
        let rt = Runtime::get();
        let mut gfx = rt.gfx.inner.lock().unwrap();

        let vertex_stride = 4 * (3 + 4 + 2);
        let mut vb_bytes = Vec::new();
        let verts: [[f32; 3]; 3] = [[-1.0, -1.0, 0.0], [1.0, -1.0, 0.0], [0.0, 1.0, 0.0]];
        for p in verts {
            vb_bytes.extend_from_slice(&p[0].to_le_bytes());
            vb_bytes.extend_from_slice(&p[1].to_le_bytes());
            vb_bytes.extend_from_slice(&p[2].to_le_bytes());
            vb_bytes.extend_from_slice(&1.0f32.to_le_bytes());
            vb_bytes.extend_from_slice(&1.0f32.to_le_bytes());
            vb_bytes.extend_from_slice(&1.0f32.to_le_bytes());
            vb_bytes.extend_from_slice(&1.0f32.to_le_bytes());
            vb_bytes.extend_from_slice(&0.0f32.to_le_bytes());
            vb_bytes.extend_from_slice(&0.0f32.to_le_bytes());
        }
        let vb_index = gfx.resources.insert(Resource::new_buffer(vb_bytes.len() as u32, BindFlags::VERTEX_BUFFER, Some(&vb_bytes))).unwrap();

        let rt_resource = gfx.resources.insert(Resource::new_texture2d(4, 4, 4, BindFlags::RENDER_TARGET, None)).unwrap();
        let rtv_index = gfx.views.insert(View::new(ViewKind::RenderTarget, rt_resource)).unwrap();
        let layout_index = gfx
            .input_layouts
            .insert(InputLayout::new(vec![InputElement { semantic_index: 0, input_slot: 0, aligned_byte_offset: 0 }, InputElement { semantic_index: 0, input_slot: 0, aligned_byte_offset: 12 }, InputElement {
                semantic_index: 0,
                input_slot: 0,
                aligned_byte_offset: 28,
            }]))
            .unwrap();

        gfx.context.vertex_buffer = Some(BoundBuffer { resource: vb_index, stride: vertex_stride, offset: 0 });
        gfx.context.render_target = Some(rtv_index);
        gfx.context.input_layout = Some(layout_index);
        gfx.context.viewport = Viewport { x: 0.0, y: 0.0, width: 4.0, height: 4.0 };

        draw_triangles(&mut gfx, &[0, 1, 2]);

        let resource = gfx.resources.get(rt_resource).unwrap();
        let offset = (2 * resource.row_pitch + 2 * 4) as usize;
        assert_eq!(&resource.data[offset..offset + 4], &[255, 255, 255, 255]);
    }
}
