use cistern::base::AssetId;
use cistern::loader::{
    Asset, AssetLoadContext, AssetLoadRequest, AssetLoadResult, AssetLoader, AssetRef,
    LoaderResult,
};
use serde::Deserialize;

#[derive(Deserialize)]
struct TextureParams {
    width: u32,
    height: u32,
    file: String,
}

#[derive(Debug)]
pub struct Texture {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl Asset for Texture {}

// Raw RGBA8 pixels, dimensions come from the metadata
#[derive(Default)]
pub struct TextureLoader;

impl AssetLoader for TextureLoader {
    fn name(&self) -> &str {
        "texture"
    }

    fn fill_request(
        &self,
        context: &AssetLoadContext,
        _asset_id: AssetId,
    ) -> LoaderResult<AssetLoadRequest> {
        let params: TextureParams = context.params()?;
        let mut request = AssetLoadRequest::default();
        request.add_data_file("pixels", params.file);
        Ok(request)
    }

    fn construct(
        &self,
        context: &AssetLoadContext,
        asset_id: AssetId,
        mut result: AssetLoadResult,
    ) -> LoaderResult<Box<dyn Asset>> {
        let params: TextureParams = context.params()?;
        let rgba = result.take_data_file("pixels").unwrap_or_default();
        let expected_len = (params.width * params.height * 4) as usize;
        if rgba.len() != expected_len {
            return Err(format!(
                "texture {} has {} bytes of pixels, expected {}",
                asset_id,
                rgba.len(),
                expected_len
            )
            .into());
        }

        Ok(Box::new(Texture {
            width: params.width,
            height: params.height,
            rgba,
        }))
    }
}

cistern::loader::register_asset_loader!(TextureLoader);

#[derive(Deserialize)]
struct FileParams {
    file: String,
}

#[derive(Deserialize)]
struct MaterialFile {
    base_color: [f32; 4],
    roughness: f32,
    albedo: AssetId,
}

#[derive(Debug)]
pub struct Material {
    pub base_color: [f32; 4],
    pub roughness: f32,
    pub albedo: AssetRef,
}

impl Asset for Material {}

#[derive(Default)]
pub struct MaterialLoader;

impl AssetLoader for MaterialLoader {
    fn name(&self) -> &str {
        "material"
    }

    fn fill_request(
        &self,
        context: &AssetLoadContext,
        _asset_id: AssetId,
    ) -> LoaderResult<AssetLoadRequest> {
        let params: FileParams = context.params()?;
        let mut request = AssetLoadRequest::default();
        request.add_data_file("material", params.file);
        Ok(request)
    }

    fn construct(
        &self,
        context: &AssetLoadContext,
        asset_id: AssetId,
        result: AssetLoadResult,
    ) -> LoaderResult<Box<dyn Asset>> {
        let bytes = result
            .data_file("material")
            .ok_or_else(|| format!("material {} has no data", asset_id))?;
        let material: MaterialFile = serde_json::from_slice(bytes)?;
        let albedo = context
            .dependency(material.albedo)
            .ok_or_else(|| format!("albedo {} is not a dependency of {}", material.albedo, asset_id))?;
        if !albedo.is::<Texture>() {
            return Err(format!("albedo {} is not a texture", material.albedo).into());
        }

        Ok(Box::new(Material {
            base_color: material.base_color,
            roughness: material.roughness,
            albedo: albedo.clone(),
        }))
    }
}

cistern::loader::register_asset_loader!(MaterialLoader);

#[derive(Deserialize)]
struct ModelParams {
    file: String,
    material: AssetId,
}

#[derive(Debug)]
pub struct Model {
    pub positions: Vec<[f32; 3]>,
    pub material: AssetRef,
}

impl Asset for Model {}

// One vertex position per line, '#' starts a comment
#[derive(Default)]
pub struct ModelLoader;

impl AssetLoader for ModelLoader {
    fn name(&self) -> &str {
        "model"
    }

    fn fill_request(
        &self,
        context: &AssetLoadContext,
        _asset_id: AssetId,
    ) -> LoaderResult<AssetLoadRequest> {
        let params: ModelParams = context.params()?;
        let mut request = AssetLoadRequest::default();
        request.add_data_file("positions", params.file);
        Ok(request)
    }

    fn construct(
        &self,
        context: &AssetLoadContext,
        asset_id: AssetId,
        result: AssetLoadResult,
    ) -> LoaderResult<Box<dyn Asset>> {
        let params: ModelParams = context.params()?;
        let text = std::str::from_utf8(result.data_file("positions").unwrap_or_default())?;

        let mut positions = Vec::default();
        for line in text.lines() {
            let line = line.split('#').next().unwrap_or_default().trim();
            if line.is_empty() {
                continue;
            }

            let values = line
                .split_whitespace()
                .map(|value| value.parse::<f32>())
                .collect::<Result<Vec<_>, _>>()?;
            match values.as_slice() {
                [x, y, z] => positions.push([*x, *y, *z]),
                _ => return Err(format!("model {} has a malformed vertex {:?}", asset_id, line).into()),
            }
        }

        let material = context
            .dependency(params.material)
            .ok_or_else(|| format!("material {} is not a dependency of {}", params.material, asset_id))?
            .clone();

        Ok(Box::new(Model {
            positions,
            material,
        }))
    }
}

cistern::loader::register_asset_loader!(ModelLoader);
